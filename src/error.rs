use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A ground-truth map and its prediction do not cover the same pixels.
    #[error("shape mismatch for image {image}: target {target:?}, prediction {prediction:?}")]
    ShapeMismatch {
        image: usize,
        target: Vec<usize>,
        prediction: Vec<usize>,
    },

    /// A label outside `[0, num_classes)` that is not the ignore index.
    #[error("invalid label {value} at image {image}, pixel {pixel} (num_classes = {num_classes})")]
    InvalidLabel {
        image: usize,
        pixel: usize,
        value: u8,
        num_classes: usize,
    },

    #[error("batch length mismatch: {targets} targets, {predictions} predictions")]
    BatchLength { targets: usize, predictions: usize },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
