//! Decoding of result payloads against declared types.
//!
//! A results response is one JSON object mapping qualified output names to
//! values. Time-series values may share their time ordinate array: instead of
//! embedding the array, `"times"` holds a string key naming another entry of
//! the same response. [`ResultDecoder`] is therefore scoped to a single
//! response and caches each referenced ordinate array so repeated references
//! parse it once. The cache never outlives the response; ordinate references
//! are response-local by protocol.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value as Json};

use crate::error::DecodeError;
use crate::model::{SeriesKind, SimValue, TimeSeries, ValueType};

/// Decoder for one results response.
pub struct ResultDecoder<'a> {
    response: &'a Map<String, Json>,
    ordinates: HashMap<String, Arc<Vec<f64>>>,
}

impl<'a> ResultDecoder<'a> {
    /// Creates a decoder over a single response object.
    pub fn new(response: &'a Map<String, Json>) -> Self {
        Self {
            response,
            ordinates: HashMap::new(),
        }
    }

    /// Decodes the named output against its declared type.
    ///
    /// A name absent from the response is a decode error, not a skip; the
    /// caller asked the server for exactly the declared outputs.
    pub fn decode_field(
        &mut self,
        name: &str,
        declared: &ValueType,
    ) -> Result<SimValue, DecodeError> {
        let value = self
            .response
            .get(name)
            .ok_or_else(|| DecodeError::MissingField(name.to_string()))?
            .clone();
        self.decode(&value, declared)
    }

    /// Decodes one JSON value against its declared type.
    pub fn decode(&mut self, value: &Json, declared: &ValueType) -> Result<SimValue, DecodeError> {
        match declared {
            ValueType::Double => Ok(SimValue::Double(double(value, declared)?)),
            ValueType::Timestamp => Ok(SimValue::Timestamp(double(value, declared)?)),
            ValueType::Integer => Ok(SimValue::Integer(integer(value, declared)?)),
            ValueType::Text => match value {
                Json::String(s) => Ok(SimValue::Text(s.clone())),
                _ => Err(incompatible(declared, value)),
            },
            ValueType::ListOfDouble => Ok(SimValue::DoubleList(double_list(value, declared)?)),
            ValueType::ListOfTimestamp => {
                Ok(SimValue::TimestampList(double_list(value, declared)?))
            }
            ValueType::ListOfInteger => {
                let items = elements(value, declared)?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(integer(item, declared)?);
                }
                Ok(SimValue::IntegerList(out))
            }
            ValueType::TimeSeriesLinear => self.decode_series(value, SeriesKind::Linear, declared),
            ValueType::TimeSeriesStep => self.decode_series(value, SeriesKind::Step, declared),
            ValueType::Other(name) => Err(DecodeError::Unsupported(name.clone())),
        }
    }

    fn decode_series(
        &mut self,
        value: &Json,
        kind: SeriesKind,
        declared: &ValueType,
    ) -> Result<SimValue, DecodeError> {
        let obj = value.as_object().ok_or_else(|| incompatible(declared, value))?;
        let times_field = obj
            .get("times")
            .ok_or_else(|| incompatible(declared, value))?;
        let values_field = obj
            .get("values")
            .ok_or_else(|| incompatible(declared, value))?;

        let times = match times_field {
            // Shared ordinate array referenced by key, resolved against this
            // response and cached for further references.
            Json::String(key) => self.ordinate(key)?,
            inline => Arc::new(double_list(inline, declared)?),
        };
        let values = double_list(values_field, declared)?;

        Ok(SimValue::Series(TimeSeries {
            kind,
            times: times.as_ref().clone(),
            values,
        }))
    }

    fn ordinate(&mut self, key: &str) -> Result<Arc<Vec<f64>>, DecodeError> {
        if let Some(cached) = self.ordinates.get(key) {
            return Ok(Arc::clone(cached));
        }
        let raw = self
            .response
            .get(key)
            .ok_or_else(|| DecodeError::UnknownOrdinate(key.to_string()))?;
        let parsed = Arc::new(double_list(raw, &ValueType::ListOfDouble)?);
        self.ordinates.insert(key.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }
}

fn incompatible(declared: &ValueType, value: &Json) -> DecodeError {
    DecodeError::Incompatible {
        declared: declared.to_string(),
        json: value.to_string(),
    }
}

fn double(value: &Json, declared: &ValueType) -> Result<f64, DecodeError> {
    value
        .as_f64()
        .ok_or_else(|| incompatible(declared, value))
}

fn integer(value: &Json, declared: &ValueType) -> Result<i64, DecodeError> {
    // as_i64 rejects 1.5 but accepts 2.0-less JSON integers only; a float
    // literal for an integer column is a declared-type mismatch.
    value
        .as_i64()
        .ok_or_else(|| incompatible(declared, value))
}

fn elements<'v>(value: &'v Json, declared: &ValueType) -> Result<&'v Vec<Json>, DecodeError> {
    value
        .as_array()
        .ok_or_else(|| incompatible(declared, value))
}

fn double_list(value: &Json, declared: &ValueType) -> Result<Vec<f64>, DecodeError> {
    let items = elements(value, declared)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(double(item, declared)?);
    }
    Ok(out)
}
