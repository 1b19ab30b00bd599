use crate::error::{Error, Result};
use facetag_vision::FaceEngine;

type Loader<E> = Box<dyn FnMut() -> anyhow::Result<E> + Send>;

/// A face engine that may not be loaded yet.
///
/// Pipelines call [`EngineSlot::get`], which runs the loader once when no
/// engine is present and fails with [`Error::Provisioning`] if that attempt
/// fails.
pub struct EngineSlot<E> {
    engine: Option<E>,
    loader: Option<Loader<E>>,
}

impl<E: FaceEngine> EngineSlot<E> {
    pub fn ready(engine: E) -> Self {
        Self {
            engine: Some(engine),
            loader: None,
        }
    }

    pub fn lazy(loader: impl FnMut() -> anyhow::Result<E> + Send + 'static) -> Self {
        Self {
            engine: None,
            loader: Some(Box::new(loader)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }

    pub fn get(&mut self) -> Result<&mut E> {
        if self.engine.is_none() {
            let loader = self
                .loader
                .as_mut()
                .ok_or_else(|| Error::Provisioning(anyhow::anyhow!("no model loader configured")))?;
            log::info!("loading face models");
            self.engine = Some(loader().map_err(Error::Provisioning)?);
        }
        self.engine
            .as_mut()
            .ok_or_else(|| Error::Provisioning(anyhow::anyhow!("face models not loaded")))
    }
}
