//! Model-backed processor
//!
//! [`ModelProcessor`] wires an inference model into a flow: `open` resolves
//! the model artifact through an injected [`ModelSource`] and loads it on the
//! configured device, `process` maps one input key through the model into an
//! output key, and `process_batch` maps the batched array element-wise.

use std::path::Path;

use async_trait::async_trait;
use flow_engine::{
    Context, Device, ExecMode, FlowError, FlowResult, Node, NodeCore, Processor,
};
use frameflow_storage::ModelSource;
use serde_json::Value;

/// A loadable model mapping one input value to one prediction
pub trait InferenceModel: Send {
    /// Load the model from a local artifact path onto a device
    fn load(path: &Path, device: Device) -> FlowResult<Self>
    where
        Self: Sized;

    /// Run one prediction
    fn predict(&mut self, input: &Value) -> FlowResult<Value>;
}

/// Processor running an [`InferenceModel`] over one context key.
///
/// The device must be chosen before `open`; changing it afterwards only
/// takes effect on the next open.
pub struct ModelProcessor<M: InferenceModel> {
    core: NodeCore,
    device: Device,
    source: ModelSource,
    artifact: String,
    input_key: String,
    output_key: String,
    model: Option<M>,
}

impl<M: InferenceModel> ModelProcessor<M> {
    /// Default key read from each unit
    pub const KEY_INPUT: &'static str = "image";
    /// Default key written to each unit
    pub const KEY_OUTPUT: &'static str = "prediction";

    pub fn new(source: ModelSource, artifact: impl Into<String>) -> Self {
        Self {
            core: NodeCore::for_type::<M>(ExecMode::Batch),
            device: Device::Cpu,
            source,
            artifact: artifact.into(),
            input_key: Self::KEY_INPUT.to_string(),
            output_key: Self::KEY_OUTPUT.to_string(),
            model: None,
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Override the unit keys read from and written to
    pub fn with_keys(mut self, input_key: impl Into<String>, output_key: impl Into<String>) -> Self {
        self.input_key = input_key.into();
        self.output_key = output_key.into();
        self
    }

    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    fn input_of(&self, unit: &Context) -> FlowResult<Value> {
        unit.get(&self.input_key).cloned().ok_or_else(|| {
            FlowError::task(format!(
                "unit delivered to '{}' is missing '{}'",
                self.core.name(),
                self.input_key
            ))
        })
    }
}

#[async_trait]
impl<M: InferenceModel> Node for ModelProcessor<M> {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn open(&mut self) -> FlowResult<()> {
        let path = self
            .source
            .fetch(&self.artifact)
            .await
            .map_err(|err| FlowError::task(err.to_string()))?;
        self.model = Some(M::load(&path, self.device)?);
        log::info!(
            "'{}' loaded {} on {}",
            self.core.name(),
            path.display(),
            self.device
        );
        Ok(())
    }

    async fn close(&mut self) -> FlowResult<()> {
        self.model = None;
        Ok(())
    }
}

#[async_trait]
impl<M: InferenceModel> Processor for ModelProcessor<M> {
    fn device(&self) -> Device {
        self.device
    }

    fn set_device(&mut self, device: Device) {
        self.device = device;
    }

    async fn process(&mut self, mut unit: Context) -> FlowResult<Context> {
        let input = self.input_of(&unit)?;
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| FlowError::config("model processor is not open"))?;
        let prediction = model.predict(&input)?;
        unit.set(self.output_key.as_str(), prediction);
        self.core.advance(1);
        Ok(unit)
    }

    async fn process_batch(&mut self, mut batch: Context) -> FlowResult<Context> {
        let inputs = self.input_of(&batch)?;
        let Value::Array(items) = inputs else {
            return Err(FlowError::task(format!(
                "'{}' expected a batched array under '{}'",
                self.core.name(),
                self.input_key
            )));
        };
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| FlowError::config("model processor is not open"))?;
        let mut outputs = Vec::with_capacity(items.len());
        for item in &items {
            outputs.push(model.predict(item)?);
        }
        self.core.advance(items.len() as u64);
        batch.set(self.output_key.as_str(), Value::Array(outputs));
        Ok(batch)
    }
}
