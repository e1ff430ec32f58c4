// ── Device wire types ──
//
// Devices, ports, interface codes and assignments as the admin daemon
// speaks them. The assignment payload (`key='value'` pairs) and the call
// argument (`backend+port+device`) are consumed literally by qubesd.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::{Error, Result};

/// Match-any placeholder for a device identity or a port.
pub const WILDCARD: &str = "*";

/// Option keys the desktop tooling knows how to edit.
pub const OPTION_READ_ONLY: &str = "read-only";
pub const OPTION_PERMISSIVE: &str = "permissive";
pub const OPTION_NO_STRICT_RESET: &str = "no-strict-reset";

/// Literal value of a set boolean option.
pub const OPTION_TRUE: &str = "True";

// ── DevClass ────────────────────────────────────────────────────────

/// Device class, as used in `admin.vm.device.{class}.*` calls.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DevClass {
    Block,
    Mic,
    Pci,
    Usb,
}

impl DevClass {
    /// Full admin method name for a device verb, e.g. `admin.vm.device.usb.Assign`.
    pub fn method(self, verb: &str) -> String {
        format!("admin.vm.device.{self}.{verb}")
    }
}

// ── DeviceInterface ─────────────────────────────────────────────────

/// Seven-character device interface code.
///
/// The first character names the bus (`u` usb, `p` pci, `b` block,
/// `m` mic, `*` any); the other six are class/subclass/protocol hex
/// digits, each of which may be `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceInterface(String);

impl DeviceInterface {
    pub const LEN: usize = 7;

    pub fn new(code: impl Into<String>) -> Result<Self> {
        let code = code.into();
        if code.len() != Self::LEN || !code.is_ascii() {
            return Err(Error::encoding(format!(
                "interface code must be {} ASCII characters: {code:?}",
                Self::LEN
            )));
        }
        let mut chars = code.chars();
        if !matches!(chars.next(), Some('u' | 'p' | 'b' | 'm' | '*')) {
            return Err(Error::encoding(format!("unknown bus in interface {code:?}")));
        }
        if !chars.all(|c| c == '*' || c.is_ascii_hexdigit()) {
            return Err(Error::encoding(format!(
                "interface {code:?} may only contain hex digits and '*'"
            )));
        }
        Ok(Self(code.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Device class of the bus character, `None` for the `*` bus.
    pub fn bus(&self) -> Option<DevClass> {
        match self.0.as_bytes().first() {
            Some(b'u') => Some(DevClass::Usb),
            Some(b'p') => Some(DevClass::Pci),
            Some(b'b') => Some(DevClass::Block),
            Some(b'm') => Some(DevClass::Mic),
            _ => None,
        }
    }

    /// Character-wise comparison where `*` on either side matches anything.
    pub fn matches(&self, other: &Self) -> bool {
        self.0
            .chars()
            .zip(other.0.chars())
            .all(|(a, b)| a == '*' || b == '*' || a == b)
    }
}

impl fmt::Display for DeviceInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceInterface {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for DeviceInterface {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<DeviceInterface> for String {
    fn from(i: DeviceInterface) -> Self {
        i.0
    }
}

// ── Port ────────────────────────────────────────────────────────────

/// Place where a backend exposes a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Port {
    pub backend_domain: String,
    pub port_id: String,
    pub devclass: DevClass,
}

impl Port {
    pub fn new(backend_domain: impl Into<String>, port_id: impl Into<String>, devclass: DevClass) -> Self {
        Self {
            backend_domain: backend_domain.into(),
            port_id: port_id.into(),
            devclass,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend_domain, self.port_id)
    }
}

// ── DeviceInfo ──────────────────────────────────────────────────────

/// A device currently exposed by a backend qube.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub port: Port,
    /// Identity of the device; `*` when the backend cannot tell.
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<DeviceInterface>,
}

impl DeviceInfo {
    pub fn new(port: Port, device_id: impl Into<String>) -> Self {
        Self {
            port,
            device_id: device_id.into(),
            product: None,
            vendor: None,
            serial: None,
            interfaces: Vec::new(),
        }
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn with_interfaces(mut self, interfaces: Vec<DeviceInterface>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn devclass(&self) -> DevClass {
        self.port.devclass
    }

    pub fn backend_domain(&self) -> &str {
        &self.port.backend_domain
    }

    pub fn identity_known(&self) -> bool {
        self.device_id != WILDCARD
    }

    /// Short human name: vendor and product when known.
    pub fn description(&self) -> String {
        match (self.vendor.as_deref(), self.product.as_deref()) {
            (Some(v), Some(p)) => format!("{v} {p}"),
            (None, Some(p)) => p.to_owned(),
            (Some(v), None) => v.to_owned(),
            (None, None) => "Unknown device".to_owned(),
        }
    }

    /// Multi-line identity summary shown next to identity-bound rules.
    pub fn identity_description(&self) -> String {
        if self.product.is_none() && self.vendor.is_none() && self.serial.is_none() {
            return "Unknown device".to_owned();
        }
        let mut lines = Vec::new();
        if let Some(product) = &self.product {
            lines.push(format!("Device name: {product}"));
        }
        lines.push(format!("Type: {}", self.devclass()));
        if let Some(vendor) = &self.vendor {
            lines.push(format!("Vendor: {vendor}"));
        }
        if let Some(serial) = &self.serial {
            lines.push(format!("Serial number: {serial}"));
        }
        lines.join("\n")
    }
}

// ── AssignmentMode ──────────────────────────────────────────────────

/// How an assignment activates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AssignmentMode {
    /// Always attached at boot; the frontend will not start without it.
    #[default]
    Required,
    /// Attached automatically when the device appears.
    AutoAttach,
    /// The user is asked before attaching.
    AskToAttach,
}

// ── DeviceAssignment ────────────────────────────────────────────────

/// A persistent rule binding a device reference to a frontend qube.
///
/// `device_id` and `port_id` may be [`WILDCARD`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAssignment {
    pub backend_domain: String,
    pub port_id: String,
    pub device_id: String,
    pub devclass: DevClass,
    pub frontend_domain: String,
    #[serde(default)]
    pub mode: AssignmentMode,
    /// Option name (without the leading underscore) to value.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl DeviceAssignment {
    /// Assignment of exactly this device at exactly this port.
    pub fn for_device(device: &DeviceInfo, frontend: impl Into<String>, mode: AssignmentMode) -> Self {
        Self {
            backend_domain: device.port.backend_domain.clone(),
            port_id: device.port.port_id.clone(),
            device_id: device.device_id.clone(),
            devclass: device.port.devclass,
            frontend_domain: frontend.into(),
            mode,
            options: BTreeMap::new(),
        }
    }

    pub fn port(&self) -> Port {
        Port::new(self.backend_domain.clone(), self.port_id.clone(), self.devclass)
    }

    pub fn with_option(mut self, key: impl Into<String>) -> Self {
        self.options.insert(key.into(), OPTION_TRUE.to_owned());
        self
    }

    /// Whether this assignment refers to the same device reference,
    /// regardless of frontend, mode and options.
    pub fn same_reference(&self, other: &Self) -> bool {
        self.backend_domain == other.backend_domain
            && self.port_id == other.port_id
            && self.device_id == other.device_id
            && self.devclass == other.devclass
    }

    /// Whether an exposed device satisfies this assignment's reference.
    pub fn matches(&self, device: &DeviceInfo) -> bool {
        self.backend_domain == device.port.backend_domain
            && self.devclass == device.port.devclass
            && (self.port_id == WILDCARD || self.port_id == device.port.port_id)
            && (self.device_id == WILDCARD || self.device_id == device.device_id)
    }

    /// Call argument: `{backend}+{port}+{device}` with `_` for a wildcard
    /// port and `+` in place of `:` inside the device id.
    pub fn encode_arg(&self) -> String {
        let port = if self.port_id == WILDCARD {
            "_"
        } else {
            self.port_id.as_str()
        };
        format!(
            "{}+{}+{}",
            self.backend_domain,
            port,
            self.device_id.replace(':', "+")
        )
    }

    /// Call payload: space-separated `key='value'` pairs, options last.
    pub fn encode_payload(&self) -> String {
        let mut parts = vec![
            format!("device_id='{}'", self.device_id),
            format!("port_id='{}'", self.port_id),
            format!("devclass='{}'", self.devclass),
            format!("backend_domain='{}'", self.backend_domain),
            format!("mode='{}'", self.mode),
            format!("frontend_domain='{}'", self.frontend_domain),
        ];
        parts.extend(self.options.iter().map(|(k, v)| format!("_{k}='{v}'")));
        parts.join(" ")
    }

    /// Parse a payload produced by [`encode_payload`](Self::encode_payload).
    pub fn parse_payload(payload: &str) -> Result<Self> {
        let mut device_id = None;
        let mut port_id = None;
        let mut devclass = None;
        let mut backend_domain = None;
        let mut mode = None;
        let mut frontend_domain = None;
        let mut options = BTreeMap::new();

        for (key, value) in split_pairs(payload)? {
            if let Some(option) = key.strip_prefix('_') {
                options.insert(option.to_owned(), value);
                continue;
            }
            match key.as_str() {
                "device_id" => device_id = Some(value),
                "port_id" => port_id = Some(value),
                "devclass" => {
                    devclass = Some(
                        DevClass::from_str(&value)
                            .map_err(|_| Error::encoding(format!("unknown devclass {value:?}")))?,
                    );
                }
                "backend_domain" => backend_domain = Some(value),
                "mode" => {
                    mode = Some(
                        AssignmentMode::from_str(&value)
                            .map_err(|_| Error::encoding(format!("unknown mode {value:?}")))?,
                    );
                }
                "frontend_domain" => frontend_domain = Some(value),
                other => return Err(Error::encoding(format!("unknown key {other:?}"))),
            }
        }

        Ok(Self {
            device_id: device_id.ok_or_else(|| missing("device_id"))?,
            port_id: port_id.ok_or_else(|| missing("port_id"))?,
            devclass: devclass.ok_or_else(|| missing("devclass"))?,
            backend_domain: backend_domain.ok_or_else(|| missing("backend_domain"))?,
            frontend_domain: frontend_domain.ok_or_else(|| missing("frontend_domain"))?,
            mode: mode.ok_or_else(|| missing("mode"))?,
            options,
        })
    }
}

impl fmt::Display for DeviceAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{} -> {} ({})",
            self.backend_domain, self.port_id, self.device_id, self.frontend_domain, self.mode
        )
    }
}

fn missing(key: &str) -> Error {
    Error::encoding(format!("missing key {key:?}"))
}

fn split_pairs(payload: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut rest = payload.trim();
    while !rest.is_empty() {
        let (key, after) = rest
            .split_once("='")
            .ok_or_else(|| Error::encoding(format!("expected key='value' at {rest:?}")))?;
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(Error::encoding(format!("invalid key {key:?}")));
        }
        let (value, tail) = after
            .split_once('\'')
            .ok_or_else(|| Error::encoding(format!("unterminated value for {key:?}")))?;
        if !tail.is_empty() && !tail.starts_with(char::is_whitespace) {
            return Err(Error::encoding(format!("missing separator after {key:?}")));
        }
        pairs.push((key.to_owned(), value.to_owned()));
        rest = tail.trim_start();
    }
    Ok(pairs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn usb_assignment() -> DeviceAssignment {
        DeviceAssignment {
            backend_domain: "sys-usb".into(),
            port_id: WILDCARD.into(),
            device_id: "1:2:u011010".into(),
            devclass: DevClass::Usb,
            frontend_domain: "test-vm".into(),
            mode: AssignmentMode::AutoAttach,
            options: BTreeMap::new(),
        }
    }

    #[test]
    fn arg_wildcards_port_and_splits_device_id() {
        assert_eq!(usb_assignment().encode_arg(), "sys-usb+_+1+2+u011010");

        let mut a = usb_assignment();
        a.port_id = "2-23".into();
        assert_eq!(a.encode_arg(), "sys-usb+2-23+1+2+u011010");
    }

    #[test]
    fn payload_matches_daemon_format() {
        assert_eq!(
            usb_assignment().encode_payload(),
            "device_id='1:2:u011010' port_id='*' devclass='usb' backend_domain='sys-usb' \
             mode='auto-attach' frontend_domain='test-vm'"
        );
    }

    #[test]
    fn payload_options_are_underscored_and_sorted() {
        let a = usb_assignment()
            .with_option(OPTION_READ_ONLY)
            .with_option(OPTION_PERMISSIVE);
        assert!(
            a.encode_payload()
                .ends_with("_permissive='True' _read-only='True'")
        );
        assert_eq!(DeviceAssignment::parse_payload(&a.encode_payload()).unwrap(), a);
    }

    #[test]
    fn parse_rejects_unknown_mode_and_garbage() {
        let bad_mode = usb_assignment().encode_payload().replace("auto-attach", "sometimes");
        assert!(DeviceAssignment::parse_payload(&bad_mode).is_err());
        assert!(DeviceAssignment::parse_payload("device_id=1").is_err());
        assert!(DeviceAssignment::parse_payload("device_id='1'port_id='2'").is_err());
        assert!(DeviceAssignment::parse_payload("device_id='1'").is_err());
    }

    #[test]
    fn parse_requires_mode() {
        let without_mode = usb_assignment()
            .encode_payload()
            .replace(" mode='auto-attach'", "");
        let err = DeviceAssignment::parse_payload(&without_mode).unwrap_err();
        assert!(err.to_string().contains("mode"), "{err}");
    }

    #[test]
    fn wildcard_assignment_matches_any_port() {
        let device = DeviceInfo::new(Port::new("sys-usb", "2-1", DevClass::Usb), "1:2:u011010");
        assert!(usb_assignment().matches(&device));

        let other = DeviceInfo::new(Port::new("sys-usb", "2-1", DevClass::Usb), "9:9:u000000");
        assert!(!usb_assignment().matches(&other));
    }

    #[test]
    fn interface_validation() {
        assert!(DeviceInterface::new("u03**01").is_ok());
        assert!(DeviceInterface::new("*******").is_ok());
        assert!(DeviceInterface::new("x030000").is_err());
        assert!(DeviceInterface::new("u03").is_err());
        assert!(DeviceInterface::new("u03zz01").is_err());
    }

    #[test]
    fn interface_wildcard_matching() {
        let generic = DeviceInterface::new("u03****").unwrap();
        let keyboard = DeviceInterface::new("u030101").unwrap();
        let printer = DeviceInterface::new("u070101").unwrap();
        assert!(generic.matches(&keyboard));
        assert!(!generic.matches(&printer));
        assert_eq!(keyboard.bus(), Some(DevClass::Usb));
        assert_eq!(DeviceInterface::new("*******").unwrap().bus(), None);
    }

    #[test]
    fn identity_description_falls_back_to_unknown() {
        let device = DeviceInfo::new(Port::new("sys-usb", "2-1", DevClass::Usb), "1:2");
        assert_eq!(device.identity_description(), "Unknown device");

        let named = device.with_product("Keyboard").with_vendor("ACME");
        assert_eq!(
            named.identity_description(),
            "Device name: Keyboard\nType: usb\nVendor: ACME"
        );
        assert_eq!(named.description(), "ACME Keyboard");
    }
}
