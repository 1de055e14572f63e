use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// PASCAL VOC 2012 segmentation classes; index 0 is background.
pub const VOC_CLASSES: [&str; 21] = [
    "background",
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

/// Cityscapes train ids. GTA labels are remapped onto the same ids.
pub const CITYSCAPES_CLASSES: [&str; 19] = [
    "road",
    "sidewalk",
    "building",
    "wall",
    "fence",
    "pole",
    "traffic light",
    "traffic sign",
    "vegetation",
    "terrain",
    "sky",
    "person",
    "rider",
    "car",
    "truck",
    "bus",
    "train",
    "motorcycle",
    "bicycle",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Voc,
    Cityscapes,
}

impl Dataset {
    pub fn class_names(self) -> &'static [&'static str] {
        match self {
            Dataset::Voc => &VOC_CLASSES,
            Dataset::Cityscapes => &CITYSCAPES_CLASSES,
        }
    }

    #[inline]
    pub fn num_classes(self) -> usize {
        self.class_names().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_counts() {
        assert_eq!(Dataset::Voc.num_classes(), 21);
        assert_eq!(Dataset::Cityscapes.num_classes(), 19);
        assert_eq!(Dataset::Cityscapes.class_names()[13], "car");
    }

    #[test]
    fn parses_cli_names() {
        assert_eq!(Dataset::from_str("voc", true), Ok(Dataset::Voc));
        assert_eq!(Dataset::from_str("cityscapes", true), Ok(Dataset::Cityscapes));
        assert!(Dataset::from_str("coco", true).is_err());
    }
}
