//! Adjacent source/destination pairs of a store chain.

use crate::error::Result;
use crate::event::BoxedEventStream;
use crate::postprocess::{post_processor_for, ConversionFunction, TypeConversion};
use crate::store::SharedStore;
use std::fmt;
use tracing::debug;

/// One migration step: data leaves `source` and lands in `dest`.
#[derive(Clone)]
pub struct EtlStage {
    /// Store data is moved out of.
    pub source: SharedStore,
    /// Store data is moved into.
    pub dest: SharedStore,
}

impl EtlStage {
    /// Creates a stage.
    pub fn new(source: SharedStore, dest: SharedStore) -> Self {
        Self { source, dest }
    }

    /// Builds the stages of a chain: `(s0 -> s1), (s1 -> s2), ...`.
    pub fn chain(stores: &[SharedStore]) -> Vec<EtlStage> {
        stores
            .windows(2)
            .map(|pair| Self::new(pair[0].clone(), pair[1].clone()))
            .collect()
    }

    /// Returns `SOURCE->DEST`, used as the metrics key.
    pub fn name(&self) -> String {
        format!("{}->{}", self.source.name(), self.dest.name())
    }

    /// Wraps a raw source stream in the destination's reduction or conversion.
    pub fn transform(&self, raw: BoxedEventStream) -> Result<BoxedEventStream> {
        let config = self.dest.config();
        if let Some(directive) = &config.post_processor {
            let post_processor = post_processor_for(directive)?;
            debug!("Reducing data moved into {} with {}", config.name, directive);
            return Ok(post_processor.wrap(raw));
        }
        if let Some(kind) = config.conversion {
            let conversion = TypeConversion::new(kind);
            if conversion.should_convert(raw.description()) {
                debug!("Converting data moved into {} to {}", config.name, kind);
                return Ok(conversion.convert(raw));
            }
        }
        Ok(raw)
    }
}

impl fmt::Debug for EtlStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
