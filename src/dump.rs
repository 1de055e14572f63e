//! Parquet exchange format for evaluation label maps.
//!
//! One row per image: `height`, `width` and the row-major `u8` ground truth and arg-max
//! prediction, each `height * width` bytes long.

use std::{fs::File, path::Path, sync::Arc};

use ndarray::Array2;
use parquet::{
    data_type::{ByteArray, ByteArrayType, Int64Type},
    file::{
        properties::WriterProperties,
        reader::FileReader,
        serialized_reader::SerializedFileReader,
        writer::SerializedFileWriter,
    },
    record::RowAccessor,
    schema::parser::parse_message_type,
};

use crate::error::{Error, Result};
use crate::metrics::LabelMap;

const SCHEMA: &str = "
message label_pairs {
    REQUIRED INT64 height;
    REQUIRED INT64 width;
    REQUIRED BYTE_ARRAY target;
    REQUIRED BYTE_ARRAY prediction;
}
";

/// Ground truth and prediction for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPair {
    pub target: LabelMap,
    pub prediction: LabelMap,
}

/// Splits pairs into the target and prediction batches expected by `update`.
pub fn unzip(pairs: &[LabelPair]) -> (Vec<LabelMap>, Vec<LabelMap>) {
    pairs
        .iter()
        .map(|p| (p.target.clone(), p.prediction.clone()))
        .unzip()
}

/// Reads every label pair stored in a Parquet file.
pub fn read_pairs(path: &Path) -> Result<Vec<LabelPair>> {
    let file = File::open(path)?;
    let reader = SerializedFileReader::new(file)?;

    let mut pairs = Vec::new();
    for (index, row) in reader.get_row_iter(None)?.enumerate() {
        let row = row?;
        let height = dimension(row.get_long(0)?, "height", index)?;
        let width = dimension(row.get_long(1)?, "width", index)?;

        pairs.push(LabelPair {
            target: label_map(row.get_bytes(2)?.data(), height, width, "target", index)?,
            prediction: label_map(row.get_bytes(3)?.data(), height, width, "prediction", index)?,
        });
    }

    Ok(pairs)
}

/// Writes label pairs as a single row group.
///
/// Only the dimensions of `target` are stored; the prediction must have the same shape.
pub fn write_pairs(path: &Path, pairs: &[LabelPair]) -> Result<()> {
    let mut heights = Vec::with_capacity(pairs.len());
    let mut widths = Vec::with_capacity(pairs.len());
    let mut targets = Vec::with_capacity(pairs.len());
    let mut predictions = Vec::with_capacity(pairs.len());

    for (image, pair) in pairs.iter().enumerate() {
        if pair.target.shape() != pair.prediction.shape() {
            return Err(Error::ShapeMismatch {
                image,
                target: pair.target.shape().to_vec(),
                prediction: pair.prediction.shape().to_vec(),
            });
        }
        let (height, width) = pair.target.dim();
        heights.push(height as i64);
        widths.push(width as i64);
        targets.push(ByteArray::from(row_major(&pair.target)));
        predictions.push(ByteArray::from(row_major(&pair.prediction)));
    }

    let schema = Arc::new(parse_message_type(SCHEMA)?);
    let props = Arc::new(WriterProperties::builder().build());
    let mut writer = SerializedFileWriter::new(File::create(path)?, schema, props)?;

    let mut row_group = writer.next_row_group()?;
    let mut column_index = 0;
    while let Some(mut column) = row_group.next_column()? {
        match column_index {
            0 => column.typed::<Int64Type>().write_batch(&heights, None, None)?,
            1 => column.typed::<Int64Type>().write_batch(&widths, None, None)?,
            2 => column.typed::<ByteArrayType>().write_batch(&targets, None, None)?,
            _ => column.typed::<ByteArrayType>().write_batch(&predictions, None, None)?,
        };
        column.close()?;
        column_index += 1;
    }
    row_group.close()?;
    writer.close()?;

    Ok(())
}

fn dimension(value: i64, name: &str, row: usize) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::InvalidData(format!("row {row}: negative {name} {value}")))
}

fn label_map(bytes: &[u8], height: usize, width: usize, column: &str, row: usize) -> Result<LabelMap> {
    Array2::from_shape_vec((height, width), bytes.to_vec()).map_err(|_| {
        Error::InvalidData(format!(
            "row {row}: {column} has {} bytes, expected {height}x{width}",
            bytes.len()
        ))
    })
}

fn row_major(map: &LabelMap) -> Vec<u8> {
    map.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use super::*;

    #[test]
    fn pairs_survive_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("round.parquet");

        let pairs = vec![
            LabelPair {
                target: arr2(&[[0u8, 1, 2], [255, 1, 0]]),
                prediction: arr2(&[[0u8, 1, 1], [3, 1, 0]]),
            },
            LabelPair {
                target: arr2(&[[4u8], [4]]),
                prediction: arr2(&[[4u8], [0]]),
            },
        ];
        write_pairs(&path, &pairs).unwrap();

        assert_eq!(read_pairs(&path).unwrap(), pairs);
    }

    #[test]
    fn transposed_maps_are_written_in_logical_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transposed.parquet");

        let target = arr2(&[[0u8, 1], [2, 3], [4, 5]]).reversed_axes();
        let pairs = vec![LabelPair {
            prediction: target.clone(),
            target,
        }];
        write_pairs(&path, &pairs).unwrap();

        let read = read_pairs(&path).unwrap();
        assert_eq!(read[0].target, arr2(&[[0u8, 2, 4], [1, 3, 5]]));
    }

    #[test]
    fn refuses_to_write_mismatched_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.parquet");

        let pairs = vec![LabelPair {
            target: arr2(&[[0u8, 1]]),
            prediction: arr2(&[[0u8], [1]]),
        }];
        assert!(matches!(
            write_pairs(&path, &pairs),
            Err(Error::ShapeMismatch { image: 0, .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_pairs(&dir.path().join("missing.parquet")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn unzip_keeps_order() {
        let pairs = vec![
            LabelPair {
                target: arr2(&[[1u8]]),
                prediction: arr2(&[[2u8]]),
            },
            LabelPair {
                target: arr2(&[[3u8]]),
                prediction: arr2(&[[4u8]]),
            },
        ];
        let (targets, predictions) = unzip(&pairs);
        assert_eq!(targets, [arr2(&[[1u8]]), arr2(&[[3u8]])]);
        assert_eq!(predictions, [arr2(&[[2u8]]), arr2(&[[4u8]])]);
    }
}
