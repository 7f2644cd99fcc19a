//! Expansion of a device group, or of a device without a selected service, into
//! the services, devices and json paths that deliver a function/aspect pair.

use std::collections::{BTreeMap, HashMap};

use event_common::model::{DeviceTypeCriteria, DeviceTypeSelectable, PathAndCharacteristic};
use tracing::warn;

use crate::devices::{DeviceInfos, Devices};
use crate::error::RequestError;

/// Where the devices of an expansion come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSource<'a> {
    Group(&'a str),
    Devices(&'a [String]),
}

/// The json paths one service offers for the requested function/aspect pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathOptions {
    pub service_id: String,
    pub json_paths: Vec<String>,
    pub path_to_characteristic_id: HashMap<String, String>,
}

/// Result of an expansion. Every collection is ordered, so expanding the same input
/// twice produces identical pipeline requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceExpansion {
    /// Sorted ascending, each service once.
    pub service_ids: Vec<String>,
    /// Devices per service, in the order the devices were listed, without duplicates.
    pub service_to_devices: BTreeMap<String, Vec<String>>,
    /// Sorted, deduplicated paths per service.
    pub service_to_paths: BTreeMap<String, Vec<String>>,
    /// Paths with their characteristic, sorted by path.
    pub service_to_path_and_characteristic: BTreeMap<String, Vec<PathAndCharacteristic>>,
}

pub async fn expand(
    devices: &dyn Devices,
    source: DeviceSource<'_>,
    function_id: &str,
    aspect_id: &str,
) -> Result<ServiceExpansion, RequestError> {
    let infos = match source {
        DeviceSource::Group(group_id) => devices.device_infos_of_group(group_id).await?,
        DeviceSource::Devices(ids) => devices.device_infos_of_devices(ids).await?,
    };

    let selectables = devices
        .device_type_selectables(&[DeviceTypeCriteria {
            function_id: function_id.to_owned(),
            aspect_id: aspect_id.to_owned(),
            ..Default::default()
        }])
        .await?;

    let options = path_options(&infos.device_type_ids, &selectables);
    Ok(expand_options(&infos, &options))
}

/// Path options per device type id.
pub fn path_options(
    device_type_ids: &[String],
    selectables: &[DeviceTypeSelectable],
) -> HashMap<String, Vec<PathOptions>> {
    let mut result: HashMap<String, Vec<PathOptions>> = HashMap::new();

    for device_type_id in device_type_ids {
        for selectable in selectables
            .iter()
            .filter(|s| &s.device_type_id == device_type_id)
        {
            let mut service_ids: Vec<&String> = selectable.service_path_options.keys().collect();
            service_ids.sort();

            for service_id in service_ids {
                let mut element = PathOptions {
                    service_id: service_id.clone(),
                    ..Default::default()
                };
                for option in &selectable.service_path_options[service_id] {
                    if &option.service_id != service_id {
                        warn!(
                            service_id = %service_id,
                            option_service_id = %option.service_id,
                            "path option listed under a foreign service, skipping it"
                        );
                        continue;
                    }
                    element.json_paths.push(option.path.clone());
                    element
                        .path_to_characteristic_id
                        .insert(option.path.clone(), option.characteristic_id.clone());
                }
                result
                    .entry(device_type_id.clone())
                    .or_default()
                    .push(element);
            }
        }
    }

    result
}

pub fn expand_options(
    infos: &DeviceInfos,
    options: &HashMap<String, Vec<PathOptions>>,
) -> ServiceExpansion {
    let mut expansion = ServiceExpansion::default();
    let mut path_to_characteristic: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

    for device in &infos.devices {
        let Some(device_options) = options.get(&device.device_type_id) else {
            continue;
        };
        for option in device_options.iter().filter(|o| !o.json_paths.is_empty()) {
            if !expansion.service_to_paths.contains_key(&option.service_id) {
                expansion.service_ids.push(option.service_id.clone());
            }

            let devices = expansion
                .service_to_devices
                .entry(option.service_id.clone())
                .or_default();
            if !devices.contains(&device.id) {
                devices.push(device.id.clone());
            }

            let paths = expansion
                .service_to_paths
                .entry(option.service_id.clone())
                .or_default();
            let characteristics = path_to_characteristic
                .entry(option.service_id.clone())
                .or_default();
            for path in &option.json_paths {
                if !paths.contains(path) {
                    paths.push(path.clone());
                }
                let characteristic_id = option
                    .path_to_characteristic_id
                    .get(path)
                    .cloned()
                    .unwrap_or_default();
                characteristics.insert(path.clone(), characteristic_id);
            }
        }
    }

    for paths in expansion.service_to_paths.values_mut() {
        paths.sort();
    }
    expansion.service_to_path_and_characteristic = path_to_characteristic
        .into_iter()
        .map(|(service_id, paths)| {
            let list = paths
                .into_iter()
                .map(|(json_path, characteristic_id)| PathAndCharacteristic {
                    json_path,
                    characteristic_id,
                })
                .collect();
            (service_id, list)
        })
        .collect();
    expansion.service_ids.sort();

    expansion
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{selectable, FakeDevices};
    use event_common::model::Device;

    fn device(id: &str, device_type_id: &str) -> Device {
        Device {
            id: id.to_owned(),
            name: id.to_owned(),
            device_type_id: device_type_id.to_owned(),
        }
    }

    fn fan_out_devices() -> FakeDevices {
        let devices = FakeDevices::default();
        devices.add_group("g1", &["d1", "d2", "d3"]);
        devices.add_device(device("d1", "t1"));
        devices.add_device(device("d2", "t1"));
        devices.add_device(device("d3", "t2"));
        devices.add_selectable(selectable("t1", "s1", &[("p1", "c1")]));
        devices.add_selectable(selectable("t2", "s2", &[("p2", "c2")]));
        devices
    }

    #[tokio::test]
    async fn group_fans_out_per_service() {
        let devices = fan_out_devices();

        let expansion = expand(&devices, DeviceSource::Group("g1"), "f1", "a1")
            .await
            .unwrap();

        assert_eq!(expansion.service_ids, vec!["s1", "s2"]);
        assert_eq!(expansion.service_to_devices["s1"], vec!["d1", "d2"]);
        assert_eq!(expansion.service_to_devices["s2"], vec!["d3"]);
        assert_eq!(expansion.service_to_paths["s1"], vec!["p1"]);
        assert_eq!(
            expansion.service_to_path_and_characteristic["s2"],
            vec![PathAndCharacteristic {
                json_path: "p2".to_owned(),
                characteristic_id: "c2".to_owned()
            }]
        );
    }

    #[tokio::test]
    async fn expansion_is_deterministic() {
        let devices = fan_out_devices();
        devices.add_selectable(selectable("t1", "s0", &[("z", "c3"), ("b", "c4"), ("m", "c5")]));

        let first = expand(&devices, DeviceSource::Group("g1"), "f1", "a1")
            .await
            .unwrap();
        let second = expand(&devices, DeviceSource::Group("g1"), "f1", "a1")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.service_ids, vec!["s0", "s1", "s2"]);
        let paths: Vec<&str> = first.service_to_path_and_characteristic["s0"]
            .iter()
            .map(|p| p.json_path.as_str())
            .collect();
        assert_eq!(paths, vec!["b", "m", "z"]);
        assert_eq!(first.service_to_paths["s0"], vec!["b", "m", "z"]);
    }

    #[tokio::test]
    async fn explicit_devices_skip_the_group_lookup() {
        let devices = fan_out_devices();
        let ids = vec!["d3".to_owned()];

        let expansion = expand(&devices, DeviceSource::Devices(&ids), "f1", "a1")
            .await
            .unwrap();

        assert_eq!(expansion.service_ids, vec!["s2"]);
        assert_eq!(expansion.service_to_devices["s2"], vec!["d3"]);
    }

    #[test]
    fn services_without_paths_are_left_out() {
        let infos = DeviceInfos::new(vec![device("d1", "t1")]);
        let mut options = HashMap::new();
        options.insert(
            "t1".to_owned(),
            vec![PathOptions {
                service_id: "s1".to_owned(),
                ..Default::default()
            }],
        );

        let expansion = expand_options(&infos, &options);
        assert!(expansion.service_ids.is_empty());
        assert!(expansion.service_to_devices.is_empty());
    }

    #[test]
    fn foreign_path_options_are_skipped() {
        let mut foreign = selectable("t1", "s1", &[("p1", "c1")]);
        if let Some(list) = foreign.service_path_options.get_mut("s1") {
            list[0].service_id = "s9".to_owned();
        }

        let options = path_options(&["t1".to_owned()], &[foreign]);
        assert!(options["t1"][0].json_paths.is_empty());
    }
}
