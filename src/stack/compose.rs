//! docker-compose rendering and parsing

use super::{PortMapping, Protocol, RestartPolicy, ServiceSpec, StackSpec, VolumeMount};
use crate::error::StackError;
use serde_yaml::{Mapping, Value};

impl StackSpec {
    /// Render as a docker-compose document
    ///
    /// Services keep declaration order. Named volumes are declared at the top
    /// level; bind mounts are not.
    pub fn to_compose_yaml(&self) -> Result<String, StackError> {
        let mut services = Mapping::new();
        let mut named_volumes = Mapping::new();

        for service in &self.services {
            let mut entry = Mapping::new();
            if let Some(image) = &service.image {
                entry.insert("image".into(), image.as_str().into());
            }
            if let Some(build) = &service.build {
                entry.insert("build".into(), build.as_str().into());
            }
            if let Some(container) = &service.container_name {
                entry.insert("container_name".into(), container.as_str().into());
            }
            if !service.ports.is_empty() {
                entry.insert("ports".into(), strings(service.ports.iter().map(|p| p.to_string())));
            }
            if !service.volumes.is_empty() {
                entry.insert("volumes".into(), strings(service.volumes.iter().map(|v| v.to_string())));
                for volume in service.volumes.iter().filter(|v| v.is_named()) {
                    named_volumes.insert(volume.source.as_str().into(), Value::Mapping(Mapping::new()));
                }
            }
            if !service.environment.is_empty() {
                let env: Mapping = service
                    .environment
                    .iter()
                    .map(|(k, v)| (Value::from(k.as_str()), Value::from(v.as_str())))
                    .collect();
                entry.insert("environment".into(), Value::Mapping(env));
            }
            if !service.depends_on.is_empty() {
                entry.insert("depends_on".into(), strings(service.depends_on.iter().cloned()));
            }
            entry.insert("restart".into(), service.restart.as_str().into());
            entry.insert("networks".into(), strings([self.network.clone()]));

            services.insert(service.name.as_str().into(), Value::Mapping(entry));
        }

        let mut network = Mapping::new();
        network.insert("driver".into(), "bridge".into());
        let mut networks = Mapping::new();
        networks.insert(self.network.as_str().into(), Value::Mapping(network));

        let mut doc = Mapping::new();
        doc.insert("services".into(), Value::Mapping(services));
        doc.insert("networks".into(), Value::Mapping(networks));
        if !named_volumes.is_empty() {
            doc.insert("volumes".into(), Value::Mapping(named_volumes));
        }

        Ok(serde_yaml::to_string(&Value::Mapping(doc))?)
    }

    /// Parse a docker-compose document
    ///
    /// Understands the short and long syntax for ports and volumes, map and
    /// list environments, and list or map `depends_on`. Keys the model has no
    /// place for are ignored.
    pub fn from_compose_yaml(yaml: &str) -> Result<Self, StackError> {
        let doc: Value = serde_yaml::from_str(yaml)?;
        let services = doc
            .get("services")
            .and_then(Value::as_mapping)
            .ok_or_else(|| StackError::Invalid("missing 'services' mapping".into()))?;

        let mut parsed = Vec::with_capacity(services.len());
        for (name, body) in services {
            let name = scalar(name).ok_or_else(|| StackError::Invalid("service name must be a string".into()))?;
            parsed.push(parse_service(name, body)?);
        }

        let network = doc
            .get("networks")
            .and_then(Value::as_mapping)
            .and_then(|m| m.keys().next())
            .and_then(scalar)
            .unwrap_or_else(|| "default".to_string());

        Ok(Self {
            network,
            services: parsed,
        })
    }
}

fn strings(items: impl IntoIterator<Item = String>) -> Value {
    Value::Sequence(items.into_iter().map(Value::String).collect())
}

/// String, number or bool rendered as text
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn invalid(service: &str, what: impl std::fmt::Display) -> StackError {
    StackError::Invalid(format!("service '{service}': {what}"))
}

fn parse_service(name: String, body: &Value) -> Result<ServiceSpec, StackError> {
    let body = body
        .as_mapping()
        .ok_or_else(|| invalid(&name, "definition must be a mapping"))?;

    let mut service = ServiceSpec {
        name,
        ..Default::default()
    };
    service.image = body.get("image").and_then(scalar);
    service.container_name = body.get("container_name").and_then(scalar);
    service.build = match body.get("build") {
        Some(Value::Mapping(build)) => build.get("context").and_then(scalar),
        Some(other) => scalar(other),
        None => None,
    };

    for port in seq(body.get("ports")) {
        service.ports.push(parse_port(port).ok_or_else(|| invalid(&service.name, format!("bad port {port:?}")))?);
    }
    for volume in seq(body.get("volumes")) {
        service.volumes.push(parse_volume(volume).ok_or_else(|| invalid(&service.name, format!("bad volume {volume:?}")))?);
    }

    match body.get("environment") {
        Some(Value::Mapping(env)) => {
            for (key, value) in env {
                let key = scalar(key).ok_or_else(|| invalid(&service.name, "bad environment key"))?;
                service.environment.push((key, scalar(value).unwrap_or_default()));
            }
        }
        Some(Value::Sequence(env)) => {
            for item in env {
                let item = scalar(item).ok_or_else(|| invalid(&service.name, "bad environment entry"))?;
                let (key, value) = item.split_once('=').unwrap_or((item.as_str(), ""));
                service.environment.push((key.to_string(), value.to_string()));
            }
        }
        _ => {}
    }

    service.depends_on = match body.get("depends_on") {
        Some(Value::Mapping(deps)) => deps.keys().filter_map(scalar).collect(),
        other => seq(other).iter().filter_map(|d| scalar(d)).collect(),
    };

    if let Some(restart) = body.get("restart").and_then(scalar) {
        service.restart = RestartPolicy::parse(&restart)
            .ok_or_else(|| invalid(&service.name, format!("unknown restart policy '{restart}'")))?;
    } else {
        service.restart = RestartPolicy::No;
    }

    Ok(service)
}

fn seq(value: Option<&Value>) -> &[Value] {
    value
        .and_then(Value::as_sequence)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// `"8000"`, `"8000:8000"`, `"127.0.0.1:8000:8000/udp"` or the long form
fn parse_port(value: &Value) -> Option<PortMapping> {
    if let Value::Mapping(long) = value {
        let container: u16 = long.get("target").and_then(scalar)?.parse().ok()?;
        let host = match long.get("published").and_then(scalar) {
            Some(p) => p.parse().ok()?,
            None => container,
        };
        let protocol = parse_protocol(long.get("protocol").and_then(scalar).as_deref())?;
        return Some(PortMapping {
            host,
            container,
            protocol,
        });
    }

    let raw = scalar(value)?;
    let (ports, protocol) = match raw.split_once('/') {
        Some((ports, proto)) => (ports, parse_protocol(Some(proto))?),
        None => (raw.as_str(), Protocol::Tcp),
    };
    let parts: Vec<&str> = ports.split(':').collect();
    let (host, container) = match parts.as_slice() {
        [only] => (*only, *only),
        [.., host, container] => (*host, *container),
        [] => return None,
    };
    Some(PortMapping {
        host: host.parse().ok()?,
        container: container.parse().ok()?,
        protocol,
    })
}

fn parse_protocol(raw: Option<&str>) -> Option<Protocol> {
    match raw {
        None | Some("tcp") => Some(Protocol::Tcp),
        Some("udp") => Some(Protocol::Udp),
        Some(_) => None,
    }
}

/// `"source:target[:mode]"` or the long form
fn parse_volume(value: &Value) -> Option<VolumeMount> {
    if let Value::Mapping(long) = value {
        return Some(VolumeMount::new(
            long.get("source").and_then(scalar)?,
            long.get("target").and_then(scalar)?,
        ));
    }
    let raw = scalar(value)?;
    let mut parts = raw.splitn(3, ':');
    let source = parts.next()?;
    let target = parts.next()?;
    Some(VolumeMount::new(source, target))
}
