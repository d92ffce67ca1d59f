/// Constructeurs de payloads MQTT au format des sondes Thermion.
pub struct ProbeMessageBuilder;

impl ProbeMessageBuilder {
    /// Payload du topic température : la valeur nue.
    pub fn temperature(value: f64) -> String {
        format!("{value}")
    }

    /// Variante avec espaces et retour chariot parasites, telle que vue
    /// sur le terrain avec certains firmwares.
    pub fn temperature_padded(value: f64) -> String {
        format!("  {value} \r\n")
    }

    /// Payload du topic calibration : "nom:valeur".
    pub fn calibration(sensor: &str, value: f64) -> String {
        format!("{sensor}:{value}")
    }

    /// Payload température illisible.
    pub fn garbled() -> &'static str {
        "ERR#42"
    }

    /// Calibration sans valeur après le séparateur.
    pub fn calibration_missing_value() -> &'static str {
        "sonde3:"
    }

    /// Calibration sans séparateur du tout.
    pub fn calibration_missing_separator() -> &'static str {
        "24.7"
    }
}
