use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Collecte les événements d'un canal broadcast sous forme JSON et permet
/// des assertions par type et par champ, sans dépendre des types du relais.
pub struct EventCollector {
    events: Vec<Value>,
}

impl EventCollector {
    /// Draine tout ce qui est en attente dans le receiver.
    pub fn drain<T: Clone + Serialize>(rx: &mut broadcast::Receiver<T>) -> Self {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Ok(value) = serde_json::to_value(&event) {
                events.push(value);
            }
        }
        log::info!("[collector] drained {} events", events.len());
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Value] {
        &self.events
    }

    /// Les événements dont le champ "type" vaut `type_name`, dans l'ordre.
    pub fn of_type(&self, type_name: &str) -> Vec<&Value> {
        self.events
            .iter()
            .filter(|e| e.get("type").and_then(Value::as_str) == Some(type_name))
            .collect()
    }

    pub fn assert_count(&self, type_name: &str, expected: usize) -> Result<()> {
        let actual = self.of_type(type_name).len();
        if actual != expected {
            anyhow::bail!(
                "expected {expected} '{type_name}' events, got {actual} (all: {:?})",
                self.events
            );
        }
        Ok(())
    }

    /// Assert sur un champ (chemin "a.b.c") du n-ième événement d'un type.
    pub fn assert_field_equals(
        &self,
        type_name: &str,
        index: usize,
        field_path: &str,
        expected: &Value,
    ) -> Result<()> {
        let events = self.of_type(type_name);
        let Some(event) = events.get(index) else {
            anyhow::bail!("no '{type_name}' event at index {index}");
        };
        match get_nested_field(event, field_path) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!(
                "field '{field_path}' mismatch: expected {expected:?}, got {actual:?}"
            ),
            None => anyhow::bail!("field '{field_path}' not found in {event:?}"),
        }
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Serialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum SampleEvent {
        Reading { value: f64 },
        DeviceStatus { device_id: String },
    }

    #[tokio::test]
    async fn drains_and_filters_by_type() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(SampleEvent::Reading { value: 1.0 }).unwrap();
        tx.send(SampleEvent::DeviceStatus {
            device_id: "a".into(),
        })
        .unwrap();
        tx.send(SampleEvent::Reading { value: 2.0 }).unwrap();

        let collected = EventCollector::drain(&mut rx);
        assert_eq!(collected.len(), 3);
        collected.assert_count("reading", 2).unwrap();
        collected.assert_count("device_status", 1).unwrap();
        collected
            .assert_field_equals("reading", 1, "value", &serde_json::json!(2.0))
            .unwrap();
        assert!(collected.assert_count("reading", 5).is_err());
    }

    #[test]
    fn nested_field_lookup() {
        let value = serde_json::json!({"a": {"b": {"c": 42}}});
        assert_eq!(
            get_nested_field(&value, "a.b.c"),
            Some(&serde_json::json!(42))
        );
        assert_eq!(get_nested_field(&value, "a.x"), None);
    }
}
