//! Home Assistant MQTT discovery for the next-bus sensor.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct DiscoveryConfig {
    pub name: String,
    pub state_topic: String,
    pub value_template: String,
    pub json_attributes_topic: String,
    pub json_attributes_template: String,
    pub unique_id: String,
    pub icon: &'static str,
    pub unit_of_measurement: &'static str,
    pub device: DiscoveryDevice,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryDevice {
    pub identifiers: Vec<&'static str>,
    pub name: &'static str,
    pub manufacturer: &'static str,
}

pub fn object_id(stop_code: u32) -> String {
    format!("rtl_schedule_{}", stop_code)
}

pub fn discovery_topic(prefix: &str, stop_code: u32) -> String {
    format!("{}/sensor/{}/config", prefix, object_id(stop_code))
}

/// Sensor config for `stop_code`. Several publishers can share one state
/// topic, so the templates only react to messages carrying their stop code.
pub fn discovery_config(stop_code: u32, state_topic: &str) -> DiscoveryConfig {
    let object_id = object_id(stop_code);
    DiscoveryConfig {
        name: format!("Next Bus at Stop {}", stop_code),
        state_topic: state_topic.to_string(),
        value_template: format!(
            "{{% if value_json.stop_code == {stop_code} %}}\
             {{{{ (value_json.nextstop_nbrmins + (value_json.nextstop_nbrsecs / 60)) | round(2) }}}}\
             {{% else %}}{{{{ states('sensor.{object_id}') }}}}{{% endif %}}"
        ),
        json_attributes_topic: state_topic.to_string(),
        json_attributes_template: format!(
            "{{% if value_json.stop_code == {stop_code} %}}{{{{ value_json | tojson }}}}{{% endif %}}"
        ),
        unique_id: object_id,
        icon: "mdi:bus-clock",
        unit_of_measurement: "min",
        device: DiscoveryDevice {
            identifiers: vec!["rtl_schedule"],
            name: "RTL Schedule",
            manufacturer: "RTL",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_topic() {
        assert_eq!(
            discovery_topic("homeassistant", 32752),
            "homeassistant/sensor/rtl_schedule_32752/config"
        );
    }

    #[test]
    fn test_discovery_payload() {
        let json = serde_json::to_value(discovery_config(123, "home/schedule/bus_stop")).unwrap();

        assert_eq!(json["name"], "Next Bus at Stop 123");
        assert_eq!(json["state_topic"], "home/schedule/bus_stop");
        assert_eq!(json["json_attributes_topic"], "home/schedule/bus_stop");
        assert_eq!(json["unique_id"], "rtl_schedule_123");
        assert_eq!(json["icon"], "mdi:bus-clock");
        assert_eq!(json["unit_of_measurement"], "min");
        assert_eq!(json["device"]["identifiers"], serde_json::json!(["rtl_schedule"]));
        assert_eq!(json["device"]["name"], "RTL Schedule");
        assert_eq!(json["device"]["manufacturer"], "RTL");
    }

    #[test]
    fn test_templates_are_scoped_to_stop_code() {
        let config = discovery_config(123, "home/schedule/bus_stop");
        assert_eq!(
            config.value_template,
            "{% if value_json.stop_code == 123 %}\
             {{ (value_json.nextstop_nbrmins + (value_json.nextstop_nbrsecs / 60)) | round(2) }}\
             {% else %}{{ states('sensor.rtl_schedule_123') }}{% endif %}"
        );
        assert_eq!(
            config.json_attributes_template,
            "{% if value_json.stop_code == 123 %}{{ value_json | tojson }}{% endif %}"
        );
    }
}
