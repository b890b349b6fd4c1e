//! The time-series store a cycle's results are written to.
//!
//! A [`Batch`] collects the [`Point`]s of one flush cycle grouped into one series per
//! metric name. Every row carries the same five columns, see [`COLUMNS`].
use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::container::ContainerID;

mod error;
mod influx;

pub use error::{Error, Result};
pub use influx::InfluxSink;

/// Column names of every series row.
pub const COLUMNS: [&str; 5] = ["host", "apptype", "appid", "metric", "value"];

/// A measured value: an absolute counter or a derived rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Counter(u64),
    Rate(f64),
}

/// One row of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub host: String,
    pub app_type: String,
    pub app_id: ContainerID,
    pub metric: String,
    pub value: Value,
}

impl Serialize for Point {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        (
            &self.host,
            &self.app_type,
            self.app_id.as_str(),
            &self.metric,
            &self.value,
        )
            .serialize(serializer)
    }
}

/// A named series as it goes over the wire.
#[derive(Debug, Serialize)]
pub struct Series<'a> {
    pub name: &'a str,
    pub columns: [&'static str; 5],
    pub points: &'a [Point],
}

/// The points of one flush cycle, grouped by metric name.
#[derive(Debug, Default, Clone)]
pub struct Batch {
    series: BTreeMap<String, Vec<Point>>,
}

impl Batch {
    pub fn push(&mut self, point: Point) {
        self.series
            .entry(point.metric.clone())
            .or_default()
            .push(point);
    }

    /// Total number of points.
    pub fn len(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// The points of the series named `metric`.
    pub fn points(&self, metric: &str) -> &[Point] {
        self.series.get(metric).map_or(&[], Vec::as_slice)
    }

    pub fn series(&self) -> Vec<Series<'_>> {
        self.series
            .iter()
            .map(|(name, points)| Series {
                name,
                columns: COLUMNS,
                points,
            })
            .collect()
    }
}

impl Extend<Point> for Batch {
    fn extend<I: IntoIterator<Item = Point>>(&mut self, iter: I) {
        for point in iter {
            self.push(point);
        }
    }
}

pub trait Sink: Send + Sync + 'static {
    /// Writes every series of `batch` to the store.
    fn write(&self, batch: &Batch) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    /// Records every batch it is asked to write.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        batches: Mutex<Vec<Batch>>,
        fail: AtomicBool,
        delay: Mutex<Option<Duration>>,
    }

    impl RecordingSink {
        pub fn batches(&self) -> Vec<Batch> {
            self.batches.lock().unwrap().clone()
        }

        pub fn writes(&self) -> usize {
            self.batches.lock().unwrap().len()
        }

        /// Writes still get recorded, then fail.
        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }
    }

    impl Sink for RecordingSink {
        async fn write(&self, batch: &Batch) -> Result<()> {
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.batches.lock().unwrap().push(batch.clone());
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Timeout(Duration::ZERO));
            }
            Ok(())
        }
    }
}
