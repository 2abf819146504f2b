use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One unit of work: a data point plus its context, and the metadata that
/// travels back out with the result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    payload: Map<String, Value>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl Envelope {
    fn new(payload: Map<String, Value>, metadata: Map<String, Value>) -> Self {
        Self { payload, metadata }
    }

    /// Envelope with empty metadata. Non-object payloads are rejected.
    pub fn from_payload(payload: Value) -> Option<Self> {
        match payload {
            Value::Object(map) => Some(Self::new(map, Map::new())),
            _ => None,
        }
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// What arrives on the work queue: one envelope, or several delivered in
/// one message and processed as one pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Single(Envelope),
    Batch(Vec<Envelope>),
}

impl Delivery {
    /// Decode a channel payload: a JSON array is a batch, anything else a
    /// single envelope.
    pub fn decode(value: Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::Array(_) => Ok(Delivery::Batch(serde_json::from_value(value)?)),
            other => Ok(Delivery::Single(serde_json::from_value(other)?)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Delivery::Single(_) => 1,
            Delivery::Batch(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_envelopes(self) -> Vec<Envelope> {
        match self {
            Delivery::Single(envelope) => vec![envelope],
            Delivery::Batch(items) => items,
        }
    }
}

impl From<Envelope> for Delivery {
    fn from(envelope: Envelope) -> Self {
        Delivery::Single(envelope)
    }
}

/// Output of one successful processing step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FitResult {
    pub data: Map<String, Value>,
    pub metadata: Map<String, Value>,
}

/// What goes out on the output channel for one processing pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Publication {
    Single(FitResult),
    Bundle(Vec<FitResult>),
}

impl Publication {
    /// `None` when the pass produced nothing.
    pub fn from_results(mut results: Vec<FitResult>) -> Option<Self> {
        match results.len() {
            0 => None,
            1 => results.pop().map(Publication::Single),
            _ => Some(Publication::Bundle(results)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Publication::Single(_) => 1,
            Publication::Bundle(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_single_envelope() {
        let delivery = Delivery::decode(json!({
            "payload": {"run_key": "A", "data": {"t": 0}},
            "metadata": {"source": "beamline"}
        }))
        .unwrap();
        let Delivery::Single(envelope) = delivery else {
            panic!("expected a single envelope");
        };
        assert_eq!(envelope.payload()["run_key"], json!("A"));
        assert_eq!(envelope.metadata()["source"], json!("beamline"));
    }

    #[test]
    fn test_decode_defaults_metadata() {
        let delivery = Delivery::decode(json!({"payload": {"x": 1}})).unwrap();
        assert_eq!(delivery.len(), 1);
        let envelope = delivery.into_envelopes().pop().unwrap();
        assert!(envelope.metadata().is_empty());
    }

    #[test]
    fn test_decode_batch() {
        let delivery = Delivery::decode(json!([
            {"payload": {"i": 1}},
            {"payload": {"i": 2}}
        ]))
        .unwrap();
        assert!(matches!(&delivery, Delivery::Batch(items) if items.len() == 2));
    }

    #[test]
    fn test_decode_rejects_non_object_payload() {
        assert!(Delivery::decode(json!({"payload": [1, 2]})).is_err());
        assert!(Delivery::decode(json!({"metadata": {}})).is_err());
        assert!(Envelope::from_payload(json!(3)).is_none());
    }

    #[test]
    fn test_publication_shape() {
        let result = FitResult {
            data: Map::new(),
            metadata: Map::new(),
        };
        assert!(Publication::from_results(vec![]).is_none());
        assert!(matches!(
            Publication::from_results(vec![result.clone()]),
            Some(Publication::Single(_))
        ));
        let bundle = Publication::from_results(vec![result.clone(), result]).unwrap();
        assert_eq!(bundle.len(), 2);
        assert!(serde_json::to_value(&bundle).unwrap().is_array());
    }
}
