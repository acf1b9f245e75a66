//! Caller-side namespace: components with typed inputs and outputs.
//!
//! The namespace is the narrow slice of the caller's type system this runtime
//! consumes. It names, per component, the input parameters a job must bind and
//! the output columns to request and decode. Qualified names on the wire are
//! `component.parameter`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value as Json};
use thiserror::Error;

use super::value::{SimValue, ValueType};

/// Errors building job input bindings.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InputError {
    /// The component or parameter is not declared in the namespace.
    #[error("no declared input {0}")]
    UnknownInput(String),

    /// The declared input type cannot be submitted to the service.
    #[error("unsupported input type {declared} for {name}")]
    UnsupportedType { name: String, declared: String },

    /// A declared input was never assigned a value.
    #[error("unbound input {0}")]
    Unbound(String),
}

/// One simulated component: its input parameters and output columns.
#[derive(Clone, Debug, Default)]
pub struct Component {
    pub inputs: BTreeMap<String, ValueType>,
    pub outputs: BTreeMap<String, ValueType>,
}

/// All components of a simulation model.
#[derive(Clone, Debug, Default)]
pub struct Namespace {
    pub components: BTreeMap<String, Component>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the qualified `component.parameter` name.
    pub fn qualify(component: &str, parameter: &str) -> String {
        format!("{component}.{parameter}")
    }

    /// Qualified names of all declared outputs, in deterministic order.
    ///
    /// This is the `only=` list sent with a results query.
    pub fn output_names(&self) -> Vec<String> {
        self.components
            .iter()
            .flat_map(|(comp, c)| {
                c.outputs
                    .keys()
                    .map(move |out| Self::qualify(comp, out))
            })
            .collect()
    }

    /// Declared outputs as (qualified name, declared type) pairs.
    pub fn outputs(&self) -> Vec<(String, ValueType)> {
        self.components
            .iter()
            .flat_map(|(comp, c)| {
                c.outputs
                    .iter()
                    .map(move |(out, ty)| (Self::qualify(comp, out), ty.clone()))
            })
            .collect()
    }
}

/// Input values for one job, validated against a shared namespace.
#[derive(Clone, Debug)]
pub struct SimulationInput {
    namespace: Arc<Namespace>,
    values: BTreeMap<String, SimValue>,
}

impl SimulationInput {
    pub fn new(namespace: Arc<Namespace>) -> Self {
        Self {
            namespace,
            values: BTreeMap::new(),
        }
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    /// Assigns a value to a declared input parameter.
    pub fn set(
        &mut self,
        component: &str,
        parameter: &str,
        value: SimValue,
    ) -> Result<(), InputError> {
        let qname = Namespace::qualify(component, parameter);
        let declared = self
            .namespace
            .components
            .get(component)
            .and_then(|c| c.inputs.get(parameter))
            .ok_or_else(|| InputError::UnknownInput(qname.clone()))?;
        if !declared.is_submittable() {
            return Err(InputError::UnsupportedType {
                name: qname,
                declared: declared.to_string(),
            });
        }
        self.values.insert(qname, value);
        Ok(())
    }

    /// Returns the bound value of a declared input, if set.
    pub fn get(&self, component: &str, parameter: &str) -> Option<&SimValue> {
        self.values.get(&Namespace::qualify(component, parameter))
    }

    /// Flattens the input into the submission body: `"component.param"` → JSON.
    ///
    /// Fails when a declared input has an unsupported type or was never bound.
    /// Values not declared by the namespace never appear in the body.
    pub fn bindings(&self) -> Result<Map<String, Json>, InputError> {
        let mut binds = Map::new();
        for (comp, c) in &self.namespace.components {
            for (inp, declared) in &c.inputs {
                let qname = Namespace::qualify(comp, inp);
                if !declared.is_submittable() {
                    return Err(InputError::UnsupportedType {
                        name: qname,
                        declared: declared.to_string(),
                    });
                }
                let value = self
                    .values
                    .get(&qname)
                    .ok_or_else(|| InputError::Unbound(qname.clone()))?;
                binds.insert(qname, value.to_json());
            }
        }
        Ok(binds)
    }
}
