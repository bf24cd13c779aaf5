//! Black-hole store: accepts appends and keeps nothing.

use crate::error::Result;
use crate::event::{
    BoxedEventStream, Event, EventStream, SampleKind, StreamDescription, VecEventStream,
};
use crate::postprocess::ConversionFunction;
use crate::store::{AppendSummary, EtlDest, EtlSource, StoragePlugin, StoreConfig};
use crate::time::Timestamp;
use std::path::PathBuf;
use tracing::debug;

/// Store that drains every appended stream and discards it.
///
/// Placed last in a chain it enforces a hard retention cutoff.
#[derive(Debug, Clone)]
pub struct BlackholeStore {
    config: StoreConfig,
}

impl BlackholeStore {
    /// Creates the store.
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    fn drain(&self, pv: &str, stream: &mut dyn EventStream) -> Result<AppendSummary> {
        let mut summary = AppendSummary::default();
        for event in stream {
            event?;
            summary.skipped += 1;
        }
        debug!(
            "Discarded {} events of {} into {}",
            summary.skipped, pv, self.config.name
        );
        Ok(summary)
    }
}

impl StoragePlugin for BlackholeStore {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn append(&self, pv: &str, stream: &mut dyn EventStream) -> Result<AppendSummary> {
        self.drain(pv, stream)
    }

    fn get_data(&self, pv: &str, _start: Timestamp, _end: Timestamp) -> Result<BoxedEventStream> {
        Ok(Box::new(VecEventStream::empty(StreamDescription::new(
            pv,
            SampleKind::ScalarDouble,
            self.config.name.clone(),
        ))))
    }

    fn last_known_event(&self, _pv: &str) -> Result<Option<Event>> {
        Ok(None)
    }

    fn first_known_event(&self, _pv: &str) -> Result<Option<Event>> {
        Ok(None)
    }

    fn rename(&self, _pv: &str, _new_pv: &str) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _pv: &str) -> Result<()> {
        Ok(())
    }

    fn convert(&self, _pv: &str, _conversion: &dyn ConversionFunction) -> Result<()> {
        Ok(())
    }

    fn etl_source(&self) -> Option<&dyn EtlSource> {
        None
    }

    fn etl_dest(&self) -> &dyn EtlDest {
        self
    }
}

impl EtlDest for BlackholeStore {
    fn stage_append(&self, pv: &str, stream: &mut dyn EventStream) -> Result<AppendSummary> {
        self.drain(pv, stream)
    }

    fn commit_staged(&self, _pv: &str, _now: Timestamp) -> Result<()> {
        Ok(())
    }

    fn discard_staged(&self, _pv: &str) -> Result<()> {
        Ok(())
    }

    fn ledger_dir(&self) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{collect_events, SampleValue};

    #[test]
    fn test_append_drains_and_discards() {
        let store = BlackholeStore::new(StoreConfig::blackhole("LTS"));
        let events = (0..5)
            .map(|i| Event::new(Timestamp::from_epoch_seconds(i), SampleValue::Int(i as i32)))
            .collect();
        let mut stream = VecEventStream::new(
            StreamDescription::new("ABC:DEF", SampleKind::ScalarInt, "test"),
            events,
        );
        let summary = store.append("ABC:DEF", &mut stream).unwrap();
        assert_eq!(summary.written, 0);
        assert_eq!(summary.skipped, 5);
        assert!(stream.next().is_none());

        let mut data = store
            .get_data(
                "ABC:DEF",
                Timestamp::from_epoch_seconds(0),
                Timestamp::from_epoch_seconds(10),
            )
            .unwrap();
        assert!(collect_events(&mut data).unwrap().is_empty());
        assert!(store.last_known_event("ABC:DEF").unwrap().is_none());
    }
}
