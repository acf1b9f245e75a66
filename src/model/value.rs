//! Typed values exchanged with the simulation service.
//!
//! The service protocol is JSON, but every input and output column carries a
//! declared [`ValueType`] from the caller's namespace. Decoding checks values
//! against their declaration instead of trusting the JSON shape.

use serde_json::Value as Json;

/// Declared type of an input or output column.
///
/// The runtime supports scalars, homogeneous lists and sampled time series.
/// Anything else a namespace may declare is carried as [`ValueType::Other`]
/// and rejected at first use: on the input side at submission, on the output
/// side when a decode is attempted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueType {
    Double,
    Integer,
    Text,
    /// Seconds-based time value; same wire representation as Double.
    Timestamp,
    ListOfDouble,
    ListOfInteger,
    ListOfTimestamp,
    /// Time series with linear interpolation between samples.
    TimeSeriesLinear,
    /// Time series with step (zero-order hold) interpolation.
    TimeSeriesStep,
    /// A declared type this runtime does not support.
    Other(String),
}

impl ValueType {
    /// Whether values of this type may be submitted as job inputs.
    ///
    /// Only scalars and homogeneous lists are accepted by the service's
    /// submission endpoint; time series and unknown types are not.
    pub fn is_submittable(&self) -> bool {
        !matches!(
            self,
            Self::TimeSeriesLinear | Self::TimeSeriesStep | Self::Other(_)
        )
    }

    /// Returns the type name for error messages and logging.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Double => "DOUBLE",
            Self::Integer => "INTEGER",
            Self::Text => "STRING",
            Self::Timestamp => "TIMESTAMP",
            Self::ListOfDouble => "LIST_OF_DOUBLE",
            Self::ListOfInteger => "LIST_OF_INTEGER",
            Self::ListOfTimestamp => "LIST_OF_TIMESTAMP",
            Self::TimeSeriesLinear => "TIMESERIES_LINEAR",
            Self::TimeSeriesStep => "TIMESERIES_STEP",
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Interpolation kind of a time series.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeriesKind {
    Linear,
    Step,
}

/// A sampled time series: paired time ordinates and values.
///
/// In responses the ordinate array may be shared between several series and
/// referenced by key; decoding resolves the reference, so a constructed
/// `TimeSeries` always holds its ordinates inline.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeries {
    pub kind: SeriesKind,
    pub times: Vec<f64>,
    pub values: Vec<f64>,
}

/// A decoded result value.
#[derive(Clone, Debug, PartialEq)]
pub enum SimValue {
    Double(f64),
    Integer(i64),
    Text(String),
    Timestamp(f64),
    DoubleList(Vec<f64>),
    IntegerList(Vec<i64>),
    TimestampList(Vec<f64>),
    Series(TimeSeries),
}

impl SimValue {
    /// Re-serializes the value to the protocol's JSON representation.
    ///
    /// Time series are emitted with inline ordinates; shared-ordinate
    /// references only exist on the wire.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Double(v) | Self::Timestamp(v) => Json::from(*v),
            Self::Integer(v) => Json::from(*v),
            Self::Text(v) => Json::from(v.clone()),
            Self::DoubleList(v) | Self::TimestampList(v) => Json::from(v.clone()),
            Self::IntegerList(v) => Json::from(v.clone()),
            Self::Series(ts) => serde_json::json!({
                "times": ts.times,
                "values": ts.values,
            }),
        }
    }

    /// The integer payload, if this value is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// The floating payload, if this value is a double or timestamp.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) | Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// The text payload, if this value is a string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}
