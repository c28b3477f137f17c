//! Chunked CSV source reader.
//!
//! Each of the four logical tables arrives as one delimited file with a
//! header row. Files are streamed in bounded chunks so peak memory is set
//! by `source.chunk_size`, not by dataset size. Rows that fail to
//! deserialize are surfaced per row (with their 1-based data row number)
//! rather than aborting the file; the transformer decides what to do with
//! them.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;

use crate::error::LoadError;

/// Raw product row as it appears in `products.csv`. Numeric columns are
/// floats in the source export (pandas writes integers with NaN holes as
/// floats), so everything numeric is read as `Option<f64>`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawProductRow {
    pub asin: String,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub source_category: Option<String>,
    pub current_price: Option<f64>,
    pub current_sales_rank: Option<f64>,
    pub rating: Option<f64>,
    pub review_count: Option<f64>,
}

/// Raw row from `price_history.csv`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPriceRow {
    pub asin: String,
    pub date: String,
    pub price_usd: Option<f64>,
    pub source_category: Option<String>,
    pub brand: Option<String>,
}

/// Raw row from `sales_rank_history.csv`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRankRow {
    pub asin: String,
    pub date: String,
    pub sales_rank: Option<f64>,
    pub source_category: Option<String>,
    pub brand: Option<String>,
}

/// Raw row from `product_metrics.csv`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMetricsRow {
    pub asin: String,
    pub source_category: Option<String>,
    pub brand: Option<String>,
    pub current_price: Option<f64>,
    pub current_rating: Option<f64>,
    pub review_count: Option<f64>,
    pub current_sales_rank: Option<f64>,
    pub monthly_sold: Option<f64>,
}

/// One raw row with its position in the file. `parsed` is `Err` when the
/// CSV layer could not coerce the row into `T`.
#[derive(Debug)]
pub struct RawRow<T> {
    pub row: u64,
    pub parsed: Result<T, String>,
}

/// Pull-based chunk iterator over one source file. The pull shape lets
/// async loaders await between chunks without buffering the whole file.
pub struct ChunkReader<T> {
    inner: csv::DeserializeRecordsIntoIter<std::fs::File, T>,
    chunk_size: usize,
    total: u64,
}

impl<T: DeserializeOwned> ChunkReader<T> {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("source file not found: {}", path.display()),
            )));
        }

        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_path(path)?;

        Ok(Self {
            inner: reader.into_deserialize(),
            chunk_size,
            total: 0,
        })
    }

    /// Next chunk of at most `chunk_size` rows, or `None` at end of file.
    /// Chunk boundaries carry no meaning beyond memory bounding.
    pub fn next_chunk(&mut self) -> Option<Vec<RawRow<T>>> {
        let mut buf: Vec<RawRow<T>> = Vec::with_capacity(self.chunk_size);
        for result in self.inner.by_ref() {
            self.total += 1;
            let parsed = result.map_err(|e| e.to_string());
            buf.push(RawRow {
                row: self.total,
                parsed,
            });
            if buf.len() >= self.chunk_size {
                break;
            }
        }
        if buf.is_empty() {
            None
        } else {
            Some(buf)
        }
    }

    /// Total data rows pulled so far.
    pub fn rows_read(&self) -> u64 {
        self.total
    }
}

/// Stream `path` in chunks of at most `chunk_size` rows, invoking `f` for
/// each chunk. Returns the total number of data rows read.
pub fn read_chunks<T, F>(path: &Path, chunk_size: usize, mut f: F) -> Result<u64, LoadError>
where
    T: DeserializeOwned,
    F: FnMut(Vec<RawRow<T>>) -> Result<(), LoadError>,
{
    let mut reader = ChunkReader::<T>::open(path, chunk_size)?;
    while let Some(chunk) = reader.next_chunk() {
        f(chunk)?;
    }
    Ok(reader.rows_read())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_chunk_boundaries_preserve_row_count() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut content = String::from("asin,date,price_usd,source_category,brand\n");
        for i in 0..25 {
            content.push_str(&format!("B00000{:04},2024-01-01,9.99,Electronics,Acme\n", i));
        }
        let path = write_file(&dir, "price_history.csv", &content);

        for chunk_size in [1usize, 7, 25, 100] {
            let mut chunks = 0usize;
            let mut rows = 0usize;
            let total = read_chunks::<RawPriceRow, _>(&path, chunk_size, |chunk| {
                chunks += 1;
                rows += chunk.len();
                Ok(())
            })
            .unwrap();
            assert_eq!(total, 25);
            assert_eq!(rows, 25, "chunk_size {} lost rows", chunk_size);
            assert!(chunks >= 1);
        }
    }

    #[test]
    fn test_row_numbers_are_one_based_and_contiguous() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "price_history.csv",
            "asin,date,price_usd,source_category,brand\n\
             B000000001,2024-01-01,5.00,,\n\
             B000000002,2024-01-02,,,\n",
        );

        let mut seen = Vec::new();
        read_chunks::<RawPriceRow, _>(&path, 10, |chunk| {
            seen.extend(chunk.iter().map(|r| r.row));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_unparseable_row_is_surfaced_not_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "price_history.csv",
            "asin,date,price_usd,source_category,brand\n\
             B000000001,2024-01-01,notanumber,,\n\
             B000000002,2024-01-02,3.50,,\n",
        );

        let mut ok = 0;
        let mut bad = 0;
        read_chunks::<RawPriceRow, _>(&path, 10, |chunk| {
            for row in &chunk {
                match &row.parsed {
                    Ok(_) => ok += 1,
                    Err(_) => bad += 1,
                }
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(ok, 1);
        assert_eq!(bad, 1);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nope.csv");
        let err = read_chunks::<RawPriceRow, _>(&path, 10, |_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("nope.csv"));
    }

    #[test]
    fn test_empty_optional_fields_deserialize_to_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "products.csv",
            "asin,title,brand,source_category,current_price,current_sales_rank,rating,review_count\n\
             B000000001,Widget,,,,,,\n",
        );

        read_chunks::<RawProductRow, _>(&path, 10, |chunk| {
            let row = chunk[0].parsed.as_ref().unwrap();
            assert_eq!(row.title.as_deref(), Some("Widget"));
            assert!(row.brand.is_none());
            assert!(row.current_price.is_none());
            assert!(row.review_count.is_none());
            Ok(())
        })
        .unwrap();
    }
}
