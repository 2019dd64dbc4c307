use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use landcover_seg::{
    dataset::{
        open_training_splits, subset_dirs, validate_subset, Augmentation, DataLoader,
        LandCoverDataset, Subset,
    },
    mocks::MockTrainableModel,
    training::{has_checkpoint, TrainingHistory, HISTORY_FILE},
    BatchSource, CheckpointMetadata, ClassPalette, SegError, Trainer, TrainerConfig,
};

const CLASS_CSV: &str = "name,r,g,b
urban,0,255,255
water,0,0,255
forest,0,255,0
agriculture,255,255,0
road,255,0,255
";

/// Left half water, right half forest.
fn write_pair(images: &Path, masks: &Path, stem: &str, width: u32, height: u32) {
    RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb([20, 40, 200])
        } else {
            Rgb([30, 160, 40])
        }
    })
    .save(images.join(format!("{stem}.jpg")))
    .unwrap();
    RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb([0, 0, 255])
        } else {
            Rgb([0, 255, 0])
        }
    })
    .save(masks.join(format!("{stem}.png")))
    .unwrap();
}

fn dataset_tree(train: usize, val: usize) -> TempDir {
    dataset_tree_with_classes(train, val, CLASS_CSV)
}

fn dataset_tree_with_classes(train: usize, val: usize, class_csv: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("class_dict_seg.csv"), class_csv).unwrap();
    for (subset, count) in [(Subset::Train, train), (Subset::Val, val)] {
        let (images, masks) = subset_dirs(dir.path(), subset);
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&masks).unwrap();
        for i in 0..count {
            write_pair(&images, &masks, &format!("tile_{i}"), 64, 48);
        }
    }
    dir
}

#[test]
fn test_validate_reports_size_mismatch() {
    let dir = dataset_tree(2, 1);
    let (images, masks) = subset_dirs(dir.path(), Subset::Train);
    RgbImage::new(64, 48).save(images.join("odd.jpg")).unwrap();
    RgbImage::new(32, 48).save(masks.join("odd.png")).unwrap();

    let csv = Path::new("class_dict_seg.csv");
    let err = validate_subset(dir.path(), csv, Subset::Train).unwrap_err();
    assert!(matches!(err, SegError::SizeMismatch { .. }));
    let message = err.to_string();
    assert!(message.contains("odd.jpg") && message.contains("odd.png"));
}

#[test]
fn test_loader_produces_model_sized_batches() {
    let dir = dataset_tree(5, 1);
    let csv = Path::new("class_dict_seg.csv");
    let summary = validate_subset(dir.path(), csv, Subset::Train).unwrap();
    assert_eq!(summary.pairs, 5);

    let (images, masks) = subset_dirs(dir.path(), Subset::Train);
    let dataset = LandCoverDataset::open(&images, &masks, summary.palette, 64)
        .unwrap()
        .with_augmentation(Augmentation::default());
    let mut loader = DataLoader::new(dataset, 2, true, 42);
    assert_eq!(loader.num_batches(), 3);

    let plans = loader.plan_epoch();
    let sizes: Vec<_> = plans.iter().map(|p| p.indices.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);

    let batch = loader.load_batch(&plans[0]).unwrap();
    assert_eq!(batch.images.shape(), &[2, 3, 64, 64]);
    assert_eq!(batch.masks.shape(), &[2, 64, 64]);
    // only water (1) and forest (2) appear in the masks
    assert!(batch.masks.iter().all(|&c| c == 1 || c == 2));

    // same plan, same augmentation
    let again = loader.load_batch(&plans[0]).unwrap();
    assert_eq!(batch.masks, again.masks);
}

fn train_with_mock(dir: &Path, losses: Vec<f32>) -> TrainingHistory {
    let csv = Path::new("class_dict_seg.csv");
    let (train_set, val_set) = open_training_splits(dir, csv, 32, None).unwrap();
    let palette = train_set.palette().clone();
    let mut train = DataLoader::new(train_set, 2, true, 7);
    let mut val = DataLoader::new(val_set, 2, false, 7);

    let config = TrainerConfig {
        epochs: losses.len(),
        output_dir: dir.join("outputs"),
        show_progress: false,
        ..TrainerConfig::default()
    };
    let model = MockTrainableModel::new(palette.len(), losses, 1);
    let mut trainer = Trainer::new(model, palette, config);
    trainer.fit(&mut train, &mut val).unwrap()
}

fn served_metadata(output: &Path) -> CheckpointMetadata {
    let metadata = CheckpointMetadata::read(&output.join("best_model.onnx"))
        .unwrap()
        .unwrap();
    metadata.check_compatible(&ClassPalette::default()).unwrap();
    metadata
}

#[test]
fn test_training_run_writes_artifacts() {
    let dir = dataset_tree(4, 2);
    let history = train_with_mock(dir.path(), vec![0.9, 0.7, 0.8]);

    assert_eq!(history.epochs(), 3);
    assert_eq!(history.best_val_loss, Some(0.7));
    assert_eq!(history.val_accs, vec![1.0; 3]);

    let output = dir.path().join("outputs");
    assert!(has_checkpoint(&output));
    served_metadata(&output);

    let saved = TrainingHistory::load(&output.join(HISTORY_FILE)).unwrap();
    assert_eq!(saved.val_losses, vec![0.9, 0.7, 0.8]);
}

#[test]
fn test_checkpoint_from_unnamed_class_map_is_servable() {
    let csv = "r,g,b\n0,255,255\n0,0,255\n0,255,0\n255,255,0\n255,0,255\n";
    let dir = dataset_tree_with_classes(2, 2, csv);
    train_with_mock(dir.path(), vec![0.5]);

    let metadata = served_metadata(&dir.path().join("outputs"));
    assert_eq!(metadata.classes, ClassPalette::default().names());
}

#[test]
fn test_class_map_with_other_colors_is_rejected() {
    let csv = "name,r,g,b\nwater,0,0,255\nurban,0,255,255\nforest,0,255,0\n";
    let dir = dataset_tree_with_classes(2, 2, csv);
    let csv = Path::new("class_dict_seg.csv");
    let err = open_training_splits(dir.path(), csv, 32, None).unwrap_err();
    assert!(matches!(err, SegError::Dataset { .. }));
    assert!(!dir.path().join("outputs").exists());
}
