//! Data model shared by drivers, the registry and the orchestrator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::decode;
use crate::transport::TransportStatus;

/// Number of slots in every parameter and value vector.
pub const SLOT_COUNT: usize = 14;

// =============================================================================
// Device Models
// =============================================================================

/// Protocol archetype a device family belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    /// Connect, one receive, fixed-offset fields.
    FixedOffset,
    /// Receive loop, delimiter or tag based fields.
    DelimitedTag,
    /// Ordered command/expected-reply steps before the result frame.
    Handshake,
    /// ENQ/ACK/NAK control-byte exchange.
    AckNak,
    /// Transmit patient metadata, no response read.
    SendOnly,
}

impl Archetype {
    /// Stable label used in logs and CLI output.
    pub fn name(&self) -> &'static str {
        match self {
            Archetype::FixedOffset => "fixed_offset",
            Archetype::DelimitedTag => "delimited_tag",
            Archetype::Handshake => "handshake",
            Archetype::AckNak => "ack_nak",
            Archetype::SendOnly => "send_only",
        }
    }
}

macro_rules! device_models {
    ($( $(#[$doc:meta])* $variant:ident => $label:literal, $archetype:ident; )+) => {
        /// Instrument model identifier.
        ///
        /// Known models without a registered driver resolve to
        /// [`ResultCode::IncompatibleDevice`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum DeviceModel {
            $( $(#[$doc])* #[serde(rename = $label)] $variant, )+
        }

        impl DeviceModel {
            /// Every known model.
            pub const ALL: &'static [DeviceModel] = &[ $( DeviceModel::$variant, )+ ];

            /// Configuration label, e.g. `"tbf210"`.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( DeviceModel::$variant => $label, )+
                }
            }

            /// Protocol archetype of the device family.
            pub fn archetype(&self) -> Archetype {
                match self {
                    $( DeviceModel::$variant => Archetype::$archetype, )+
                }
            }
        }
    };
}

device_models! {
    /// A&D AD-6400 height/weight scale.
    Ad6400 => "ad6400", FixedOffset;
    /// Tanita TBF-210 body composition analyser.
    Tbf210 => "tbf210", FixedOffset;
    /// Tanita TBF-102.
    Tbf102 => "tbf102", FixedOffset;
    /// Tanita TBF-310 body composition analyser.
    Tbf310 => "tbf310", DelimitedTag;
    /// Tanita WB-110 digital scale.
    Wb110 => "wb110", DelimitedTag;
    /// Tanita WB-150 digital scale.
    Wb150 => "wb150", DelimitedTag;
    /// Tanita BH-100 stadiometer.
    Bh100 => "bh100", FixedOffset;
    /// Tanita DC-217 body composition analyser.
    Dc217 => "dc217", DelimitedTag;
    /// Tanita DC-430 body composition analyser.
    Dc430 => "dc430", DelimitedTag;
    /// Tanita DC-320 body composition analyser, PC mode.
    Dc320 => "dc320", Handshake;
    /// Tanita DC-250 in print-out mode.
    Dc250T => "dc250t", FixedOffset;
    /// Tanita DC-250 in PC mode.
    Dc250Pcm => "dc250pcm", Handshake;
    /// Terumo TM-2580 blood pressure monitor.
    Tm2580 => "tm2580", FixedOffset;
    /// A&D TM-2655 blood pressure monitor.
    Tm2655 => "tm2655", Handshake;
    /// USM-700GSI blood pressure monitor.
    Usm700Gsi => "usm700gsi", FixedOffset;
    /// RV-2 blood pressure monitor.
    Rv2 => "rv2", FixedOffset;
    /// RV-3 blood pressure monitor.
    Rv3 => "rv3", FixedOffset;
    /// Rion AB-29 audiometer.
    Ab29 => "ab29", Handshake;
    /// CV-20 vision tester.
    Cv20 => "cv20", Handshake;
    /// NV-300 vision tester.
    Nv300 => "nv300", Handshake;
    /// Chest SP-350COPD spirometer.
    Sp350Copd => "sp350copd", AckNak;
    /// Chest SP-750COPD spirometer.
    Sp750Copd => "sp750copd", AckNak;
    /// Fukuda FX-3 spirometer.
    Fx3 => "fx3", AckNak;
    /// Tomey CT-70 non-contact tonometer.
    Ct70 => "ct70", DelimitedTag;
    /// Nidek NCT-10 non-contact tonometer.
    Nct10 => "nct10", DelimitedTag;
    /// Topcon TX-20P tonometer.
    Tx20P => "tx20p", AckNak;
    /// Aloka AOS-100NW bone densitometer.
    Aos100Nw => "aos100nw", Handshake;
    /// DTM-15 waist measure.
    Dtm15 => "dtm15", FixedOffset;
    /// Fukuda Colin VaSera VS-3000, result receiver.
    Vs3000Recv => "vs3000recv", FixedOffset;
    /// Fukuda Colin VaSera VS-3000, patient sender.
    Vs3000Send => "vs3000send", SendOnly;
    /// Fukuda Denshi ECG-1450 electrocardiograph.
    Ecg1450 => "ecg1450", SendOnly;
    /// Fukuda Denshi FCP-4521 electrocardiograph.
    Fcp4521 => "fcp4521", SendOnly;
    /// Fukuda Denshi generic interface (Image One).
    FukudaImo => "fukudaimo", SendOnly;
    /// Fukuda Denshi generic interface, health-medicine variant.
    FukudaImo2 => "fukudaimo2", SendOnly;
    /// Fukuda Denshi common interface.
    FukudaCmn => "fukudacmn", SendOnly;
    /// QR CONNECT (Vigoment) fundus camera link.
    QrConnect => "qrconnect", SendOnly;
    /// QR CONNECT with Image One.
    QrConnectImo => "qrconnectimo", SendOnly;
    /// QR CONNECT for gastric X-ray.
    QrConnectDr => "qrconnectdr", SendOnly;
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        DeviceModel::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| format!("unknown device model '{s}'"))
    }
}

/// How a driver treats malformed values it could skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Malformed required values end the run.
    #[default]
    Strict,
    /// Malformed values are left blank or the request is repeated.
    Lenient,
}

/// A configured instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique device identifier.
    pub id: String,
    /// Transport address (serial device path, radio address, ...).
    pub address: String,
    /// Instrument model; fixes the protocol archetype.
    pub model: DeviceModel,
    /// Overrides the driver's default strictness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strictness: Option<Strictness>,
}

impl DeviceDescriptor {
    /// Protocol archetype tag of the device.
    pub fn archetype(&self) -> Archetype {
        self.model.archetype()
    }
}

// =============================================================================
// Value Vectors
// =============================================================================

/// Fixed 14-slot vector of strings.
///
/// Out-of-range reads return `""` and out-of-range writes are ignored, so no
/// caller can observe or create a vector of any other length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueVector([String; SLOT_COUNT]);

impl Default for ValueVector {
    fn default() -> Self {
        Self(std::array::from_fn(|_| String::new()))
    }
}

impl ValueVector {
    /// Empty vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `items`, padding with `""` or truncating to 14 slots.
    pub fn from_slice<S: AsRef<str>>(items: &[S]) -> Self {
        let mut out = Self::default();
        for (slot, item) in out.0.iter_mut().zip(items) {
            *slot = item.as_ref().to_string();
        }
        out
    }

    /// Slot text, `""` when out of range.
    pub fn get(&self, index: usize) -> &str {
        self.0.get(index).map(String::as_str).unwrap_or("")
    }

    /// Overwrite a slot. Out-of-range writes are ignored.
    pub fn set(&mut self, index: usize, value: impl Into<String>) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value.into();
        }
    }

    /// Whether the slot is empty after trimming.
    pub fn is_blank(&self, index: usize) -> bool {
        self.get(index).trim().is_empty()
    }

    /// Reset every slot to `""`.
    pub fn clear(&mut self) {
        for slot in &mut self.0 {
            slot.clear();
        }
    }

    /// Trim every slot in place.
    pub fn trim_all(&mut self) {
        for slot in &mut self.0 {
            let trimmed = slot.trim();
            if trimmed.len() != slot.len() {
                *slot = trimmed.to_string();
            }
        }
    }

    /// Slot count, always 14.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the slots.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Borrow as a slice.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Convert to a `Vec`.
    pub fn into_vec(self) -> Vec<String> {
        self.0.into()
    }
}

// =============================================================================
// Requests and Results
// =============================================================================

/// One examination step submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementRequest {
    /// Examination form identifier.
    pub form_id: u32,
    /// Sub-identifier within the form.
    pub sub_id: u32,
    /// Patient and mode parameters, 14 slots.
    pub params: ValueVector,
}

impl MeasurementRequest {
    /// Build a request, padding or truncating `params` to 14 slots.
    pub fn new<S: AsRef<str>>(form_id: u32, sub_id: u32, params: &[S]) -> Self {
        Self {
            form_id,
            sub_id,
            params: ValueVector::from_slice(params),
        }
    }
}

/// Outcome of one measurement run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementResult {
    /// Value slots. Not dependable unless `code` is [`ResultCode::Success`].
    pub values: ValueVector,
    /// Outcome.
    pub code: ResultCode,
}

impl Default for MeasurementResult {
    fn default() -> Self {
        Self {
            values: ValueVector::new(),
            code: ResultCode::MeasurementError,
        }
    }
}

impl MeasurementResult {
    /// Result with no values and the given code.
    ///
    /// Used for transmit-only runs, which report a status but read nothing.
    pub fn from_code(code: ResultCode) -> Self {
        Self {
            values: ValueVector::new(),
            code,
        }
    }

    /// Result for a run that ended before any value was read.
    pub fn failed(code: ResultCode) -> Self {
        Self::from_code(code)
    }

    /// Whether the run succeeded.
    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }
}

/// Closed set of outcomes returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    /// All required fields extracted and validated.
    Success,
    /// No device mapped to the requested item.
    ConfigurationError,
    /// Device mapped but no driver registered for its model.
    IncompatibleDevice,
    /// Empty read, reply mismatch, invalid required field or instrument cancel.
    Cancelled,
    /// Transport reported a device failure.
    DeviceFailed,
    /// Transport reported a driver error.
    DriverError,
    /// Transport reported an unsupported operation.
    Unsupported,
    /// Fault inside the driver or a final value rejected after all steps.
    MeasurementError,
}

impl ResultCode {
    /// Legacy numeric status: 0 success, 1 configuration, 3 incompatible,
    /// 9 any receive failure.
    pub fn status_code(&self) -> u8 {
        match self {
            ResultCode::Success => 0,
            ResultCode::ConfigurationError => 1,
            ResultCode::IncompatibleDevice => 3,
            _ => 9,
        }
    }

    /// Whether the code was mapped from a transport status.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            ResultCode::DeviceFailed | ResultCode::DriverError | ResultCode::Unsupported
        )
    }

    /// Stable label.
    pub fn name(&self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::ConfigurationError => "configuration_error",
            ResultCode::IncompatibleDevice => "incompatible_device",
            ResultCode::Cancelled => "cancelled",
            ResultCode::DeviceFailed => "device_failed",
            ResultCode::DriverError => "driver_error",
            ResultCode::Unsupported => "unsupported",
            ResultCode::MeasurementError => "measurement_error",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<TransportStatus> for ResultCode {
    fn from(status: TransportStatus) -> Self {
        match status {
            TransportStatus::Success => ResultCode::Success,
            TransportStatus::Failed => ResultCode::DeviceFailed,
            TransportStatus::DriverError => ResultCode::DriverError,
            TransportStatus::Unsupported => ResultCode::Unsupported,
        }
    }
}

// =============================================================================
// Frames and Fields
// =============================================================================

/// Receive buffer plus the length of valid data in it.
///
/// The buffer is allocated once per run and reinterpreted by offset; it is
/// never resized.
#[derive(Debug, Clone)]
pub struct Frame {
    buf: Vec<u8>,
    len: usize,
}

impl Frame {
    /// Zeroed frame of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            len: 0,
        }
    }

    /// Whole buffer, for the transport to fill.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Mark the first `len` bytes as valid (clamped to capacity).
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.buf.len());
    }

    /// Valid length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no valid data is held.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Valid bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Valid bytes, mutable (for in-place parity stripping).
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }

    /// Whole physical buffer, including stale bytes past the valid length.
    pub fn physical(&self) -> &[u8] {
        &self.buf
    }

    /// Valid bytes decoded as single-byte text.
    pub fn text(&self) -> String {
        decode(self.bytes())
    }

    /// First valid byte.
    pub fn first(&self) -> Option<u8> {
        self.bytes().first().copied()
    }

    /// Byte at a 1-based offset within the valid data.
    pub fn byte_at(&self, position: usize) -> Option<u8> {
        position
            .checked_sub(1)
            .and_then(|i| self.bytes().get(i))
            .copied()
    }

    /// Whether the valid data begins with `prefix`.
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.bytes().starts_with(prefix)
    }

    /// Whether the valid data contains `byte`.
    pub fn contains(&self, byte: u8) -> bool {
        self.bytes().contains(&byte)
    }

    /// Zero the buffer and drop the valid length.
    pub fn reset(&mut self) {
        self.buf.fill(0);
        self.len = 0;
    }
}

/// Intermediate result of field extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedField {
    /// Tag or field name.
    pub tag: String,
    /// Extracted text before normalisation.
    pub raw: String,
    /// Normalised text written to a value slot.
    pub value: String,
    /// Whether `value` is a plain decimal number.
    pub numeric: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_vector_always_has_fourteen_slots() {
        assert_eq!(ValueVector::new().len(), SLOT_COUNT);
        assert_eq!(ValueVector::from_slice(&["a"]).len(), SLOT_COUNT);

        let long: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        let v = ValueVector::from_slice(&long);
        assert_eq!(v.len(), SLOT_COUNT);
        assert_eq!(v.get(13), "13");
        assert_eq!(v.get(14), "");
    }

    #[test]
    fn value_vector_ignores_out_of_range_writes() {
        let mut v = ValueVector::new();
        v.set(14, "x");
        v.set(99, "x");
        assert!(v.iter().all(str::is_empty));
        v.set(2, " 62.5 ");
        assert_eq!(v.get(2), " 62.5 ");
        v.trim_all();
        assert_eq!(v.get(2), "62.5");
        v.clear();
        assert!(v.is_blank(2));
    }

    #[test]
    fn status_only_result_keeps_code() {
        let sent = MeasurementResult::from_code(ResultCode::Success);
        assert!(sent.is_success());
        assert!(sent.values.iter().all(str::is_empty));

        let failed = MeasurementResult::failed(ResultCode::Cancelled);
        assert!(!failed.is_success());
        assert_eq!(failed.code, ResultCode::Cancelled);
    }

    #[test]
    fn request_pads_params() {
        let req = MeasurementRequest::new(3, 0, &["", "1", "170.0"]);
        assert_eq!(req.params.get(1), "1");
        assert_eq!(req.params.get(2), "170.0");
        assert_eq!(req.params.get(3), "");
        assert_eq!(req.params.len(), SLOT_COUNT);
    }

    #[test]
    fn result_defaults_to_measurement_error() {
        let result = MeasurementResult::default();
        assert_eq!(result.code, ResultCode::MeasurementError);
        assert!(!result.is_success());
    }

    #[test]
    fn transport_status_maps_one_to_one() {
        assert_eq!(ResultCode::from(TransportStatus::Success), ResultCode::Success);
        assert_eq!(ResultCode::from(TransportStatus::Failed), ResultCode::DeviceFailed);
        assert_eq!(ResultCode::from(TransportStatus::DriverError), ResultCode::DriverError);
        assert_eq!(ResultCode::from(TransportStatus::Unsupported), ResultCode::Unsupported);
        assert!(ResultCode::DeviceFailed.is_transport_failure());
        assert!(!ResultCode::Cancelled.is_transport_failure());
    }

    #[test]
    fn legacy_status_codes() {
        assert_eq!(ResultCode::Success.status_code(), 0);
        assert_eq!(ResultCode::ConfigurationError.status_code(), 1);
        assert_eq!(ResultCode::IncompatibleDevice.status_code(), 3);
        assert_eq!(ResultCode::Cancelled.status_code(), 9);
    }

    #[test]
    fn device_model_labels_round_trip() {
        for model in DeviceModel::ALL {
            assert_eq!(model.as_str().parse::<DeviceModel>(), Ok(*model));
        }
        assert_eq!("TBF-210".parse::<DeviceModel>(), Ok(DeviceModel::Tbf210));
        assert_eq!("SP_350COPD".parse::<DeviceModel>(), Ok(DeviceModel::Sp350Copd));
        assert!("unknown".parse::<DeviceModel>().is_err());
    }

    #[test]
    fn descriptor_deserializes_from_toml() {
        let descriptor: DeviceDescriptor = toml::from_str(
            r#"
            id = "scale"
            address = "/dev/rfcomm0"
            model = "wb110"
            strictness = "lenient"
            "#,
        )
        .unwrap();
        assert_eq!(descriptor.model, DeviceModel::Wb110);
        assert_eq!(descriptor.strictness, Some(Strictness::Lenient));
        assert_eq!(descriptor.archetype(), Archetype::DelimitedTag);
    }

    #[test]
    fn result_serializes_codes_in_snake_case() {
        let json = serde_json::to_string(&ResultCode::IncompatibleDevice).unwrap();
        assert_eq!(json, "\"incompatible_device\"");
    }

    #[test]
    fn frame_tracks_valid_length() {
        let mut frame = Frame::with_capacity(8);
        frame.buffer_mut()[..3].copy_from_slice(b"S 1");
        frame.set_len(3);
        assert_eq!(frame.bytes(), b"S 1");
        assert_eq!(frame.byte_at(1), Some(b'S'));
        assert_eq!(frame.byte_at(4), None);
        assert!(frame.starts_with(b"S "));
        frame.set_len(100);
        assert_eq!(frame.len(), 8);
        frame.reset();
        assert!(frame.is_empty());
    }
}
