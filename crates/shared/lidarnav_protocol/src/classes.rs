use serde::{Deserialize, Serialize};

/// Raw class id as sent by the segmentation server.
///
/// Ids are not validated on the wire; anything outside the legend is "unknown".
pub type ClassId = i32;

/// Number of classes in the legend (ids `0..NUM_CLASSES`).
pub const NUM_CLASSES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticClass {
    Unlabeled,
    Wall,
    Chair,
    Door,
    Ceiling,
    Table,
    Window,
    Sofa,
}

impl SemanticClass {
    pub fn from_id(id: ClassId) -> Option<Self> {
        match id {
            0 => Some(SemanticClass::Unlabeled),
            1 => Some(SemanticClass::Wall),
            2 => Some(SemanticClass::Chair),
            3 => Some(SemanticClass::Door),
            4 => Some(SemanticClass::Ceiling),
            5 => Some(SemanticClass::Table),
            6 => Some(SemanticClass::Window),
            7 => Some(SemanticClass::Sofa),
            _ => None,
        }
    }

    pub fn id(self) -> ClassId {
        self as ClassId
    }

    pub fn label(self) -> &'static str {
        match self {
            SemanticClass::Unlabeled => "unlabeled",
            SemanticClass::Wall => "wall",
            SemanticClass::Chair => "chair",
            SemanticClass::Door => "door",
            SemanticClass::Ceiling => "ceiling",
            SemanticClass::Table => "table",
            SemanticClass::Window => "window",
            SemanticClass::Sofa => "sofa",
        }
    }

    pub fn all() -> &'static [SemanticClass] {
        &[
            SemanticClass::Unlabeled,
            SemanticClass::Wall,
            SemanticClass::Chair,
            SemanticClass::Door,
            SemanticClass::Ceiling,
            SemanticClass::Table,
            SemanticClass::Window,
            SemanticClass::Sofa,
        ]
    }

    /// Ids of every class in the legend, in ascending order.
    pub fn known_ids() -> impl Iterator<Item = ClassId> {
        Self::all().iter().map(|c| c.id())
    }
}

/// Display label for a raw id; ids outside the legend read as "unknown".
pub fn class_label(id: ClassId) -> &'static str {
    SemanticClass::from_id(id).map_or("unknown", SemanticClass::label)
}
