//! Subtitle companion store.
//!
//! The transcoding collaborator deposits a subtitle out-of-band; renderers
//! fetch it whole from `/mediasub<ext>`, or as SAMI from `/media.smi`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use mediafeed_common::{normalize_extension, Result};
use parking_lot::Mutex;

/// Converts a subtitle to SAMI. The conversion itself is external.
pub trait SamiConverter: Send + Sync {
    fn to_sami(&self, subtitle: &[u8], extension: &str) -> Result<Bytes>;
}

struct Subtitle {
    data: Bytes,
    extension: String,
    sami: Option<Bytes>,
    generation: u64,
}

#[derive(Default)]
pub struct SubtitleStore {
    current: Mutex<Option<Subtitle>>,
    generations: AtomicU64,
    converter: Option<Arc<dyn SamiConverter>>,
}

impl SubtitleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_converter(converter: Arc<dyn SamiConverter>) -> Self {
        Self {
            converter: Some(converter),
            ..Self::default()
        }
    }

    /// Replace the subtitle. Any cached SAMI form is dropped.
    pub fn set_subtitle(&self, data: impl Into<Bytes>, extension: &str) {
        let data = data.into();
        let extension = normalize_extension(extension);
        tracing::info!(extension = %extension, bytes = data.len(), "Subtitle set");
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        *self.current.lock() = Some(Subtitle {
            data,
            extension,
            sami: None,
            generation,
        });
    }

    pub fn clear(&self) {
        *self.current.lock() = None;
    }

    /// Extension of the current subtitle, with its leading dot.
    pub fn extension(&self) -> Option<String> {
        self.current.lock().as_ref().map(|s| s.extension.clone())
    }

    /// The subtitle as deposited, if its extension matches.
    pub fn get(&self, extension: &str) -> Option<Bytes> {
        let current = self.current.lock();
        current
            .as_ref()
            .filter(|s| s.extension.eq_ignore_ascii_case(extension))
            .map(|s| s.data.clone())
    }

    /// The subtitle in SAMI form, converted on first use.
    ///
    /// `Ok(None)` when there is no subtitle, or it is not SAMI and no
    /// converter is installed.
    pub fn sami(&self) -> Result<Option<Bytes>> {
        let (data, extension, generation) = {
            let current = self.current.lock();
            let Some(subtitle) = current.as_ref() else {
                return Ok(None);
            };
            if subtitle.extension.eq_ignore_ascii_case(".smi") {
                return Ok(Some(subtitle.data.clone()));
            }
            if let Some(sami) = &subtitle.sami {
                return Ok(Some(sami.clone()));
            }
            (
                subtitle.data.clone(),
                subtitle.extension.clone(),
                subtitle.generation,
            )
        };
        let Some(converter) = &self.converter else {
            return Ok(None);
        };

        // Converted unlocked; only cached if the subtitle was not replaced meanwhile.
        let sami = converter.to_sami(&data, &extension)?;
        tracing::debug!(from = %extension, bytes = sami.len(), "Converted subtitle to SAMI");
        if let Some(subtitle) = self
            .current
            .lock()
            .as_mut()
            .filter(|s| s.generation == generation)
        {
            subtitle.sami = Some(sami.clone());
        }
        Ok(Some(sami))
    }
}
