use std::collections::HashSet;
use std::path::Path;

use image::Rgb;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SegError};

/// One land-cover class: its display name and mask color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandCoverClass {
    pub name: String,
    pub color: [u8; 3],
}

impl LandCoverClass {
    pub fn new(name: impl Into<String>, color: [u8; 3]) -> Self {
        Self {
            name: name.into(),
            color,
        }
    }

    pub const fn rgb(&self) -> Rgb<u8> {
        Rgb(self.color)
    }
}

/// Ordered class palette. The position of a class is the model output
/// channel it is decoded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<LandCoverClass>", into = "Vec<LandCoverClass>")]
pub struct ClassPalette {
    classes: Vec<LandCoverClass>,
}

impl ClassPalette {
    pub fn new(classes: Vec<LandCoverClass>) -> Result<Self> {
        if classes.is_empty() {
            return Err(SegError::Configuration {
                message: "class palette is empty".to_string(),
            });
        }
        if classes.len() > usize::from(u8::MAX) + 1 {
            return Err(SegError::Configuration {
                message: format!("class palette has {} entries (max 256)", classes.len()),
            });
        }

        let mut names = HashSet::new();
        let mut colors = HashSet::new();
        for class in &classes {
            if !names.insert(class.name.as_str()) {
                return Err(SegError::Configuration {
                    message: format!("duplicate class name `{}`", class.name),
                });
            }
            if !colors.insert(class.color) {
                return Err(SegError::Configuration {
                    message: format!("duplicate class color {:?}", class.color),
                });
            }
        }

        Ok(Self { classes })
    }

    /// Reads a class-color CSV (`r,g,b` columns, optional `name`). Row order
    /// is the class index.
    pub fn from_csv(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SegError::Dataset {
                reason: format!("Class map not found: {}", path.display()),
            });
        }

        #[derive(Deserialize)]
        struct Row {
            #[serde(default)]
            name: Option<String>,
            r: u8,
            g: u8,
            b: u8,
        }

        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
        let classes = reader
            .deserialize::<Row>()
            .enumerate()
            .map(|(idx, row)| {
                let row = row?;
                let name = row.name.unwrap_or_else(|| format!("class_{idx}"));
                Ok(LandCoverClass::new(name, [row.r, row.g, row.b]))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(classes)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &[LandCoverClass] {
        &self.classes
    }

    pub fn get(&self, index: usize) -> Option<&LandCoverClass> {
        self.classes.get(index)
    }

    pub fn names(&self) -> Vec<String> {
        self.classes.iter().map(|c| c.name.clone()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|c| c.name == name)
    }

    pub fn index_of_color(&self, color: [u8; 3]) -> Option<usize> {
        self.classes.iter().position(|c| c.color == color)
    }

    pub fn color_of(&self, index: usize) -> Option<Rgb<u8>> {
        self.classes.get(index).map(LandCoverClass::rgb)
    }

    /// Borrowed view that serializes as an ordered `{name: [r, g, b]}` map.
    pub const fn as_color_map(&self) -> ColorMap<'_> {
        ColorMap(self)
    }
}

impl Default for ClassPalette {
    /// The five land-cover classes the shipped checkpoints are trained on.
    fn default() -> Self {
        Self {
            classes: vec![
                LandCoverClass::new("urban", [0, 255, 255]),
                LandCoverClass::new("water", [0, 0, 255]),
                LandCoverClass::new("forest", [0, 255, 0]),
                LandCoverClass::new("agriculture", [255, 255, 0]),
                LandCoverClass::new("road", [255, 0, 255]),
            ],
        }
    }
}

impl TryFrom<Vec<LandCoverClass>> for ClassPalette {
    type Error = SegError;

    fn try_from(classes: Vec<LandCoverClass>) -> Result<Self> {
        Self::new(classes)
    }
}

impl From<ClassPalette> for Vec<LandCoverClass> {
    fn from(palette: ClassPalette) -> Self {
        palette.classes
    }
}

pub struct ColorMap<'a>(&'a ClassPalette);

impl Serialize for ColorMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for class in self.0.classes() {
            map.serialize_entry(&class.name, &class.color)?;
        }
        map.end()
    }
}
