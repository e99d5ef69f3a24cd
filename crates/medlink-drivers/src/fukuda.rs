//! Send-only patient links: Fukuda Denshi electrocardiographs and image
//! servers, and the QR CONNECT camera link.
//!
//! The Fukuda records share one frame:
//!
//! ```text
//!   STX | "A0FUJI" ... ETX | BCC (XOR over everything after STX)
//! ```
//!
//! The patient name is enclosed in shift-out / shift-in control bytes.
//! QR CONNECT takes a bare fixed-width record.

use medlink_core::codec::{append_bcc, control, encode, pad_left_zero, pad_right_space, BccMode};
use medlink_core::{DeviceModel, ProtocolError, SendDriver, ValueVector};

use crate::patient::{sex_letter, BirthDate};

/// Record header (JIS mode selector and vendor tag).
const HEADER: &str = "A0FUJI";

/// Wrap a record body in `STX` and terminate it with `ETX` plus XOR BCC.
fn fukuda_frame(body: &str) -> Vec<u8> {
    let mut data = encode(body);
    data.push(control::ETX);
    let mut frame = vec![control::STX];
    frame.extend(append_bcc(&data, BccMode::Xor));
    frame
}

fn shifted_name(name: &str, width: usize) -> String {
    format!(
        "{}{}{}",
        char::from(control::SO),
        pad_right_space(name, width),
        char::from(control::SI)
    )
}

// =============================================================================
// Electrocardiograph
// =============================================================================

/// Fukuda Denshi FCP-4521 electrocardiograph (also the health-medicine
/// generic interface).
///
/// Parameters: 1 exam number, 2 reservation sequence, 3 name, 4 sex,
/// 5 birth date, 6 age.
#[derive(Debug, Clone, Copy)]
pub struct FukudaEcgSender {
    model: DeviceModel,
}

impl FukudaEcgSender {
    /// FCP-4521.
    pub fn fcp4521() -> Self {
        Self {
            model: DeviceModel::Fcp4521,
        }
    }

    /// Generic interface, health-medicine variant.
    pub fn imo2() -> Self {
        Self {
            model: DeviceModel::FukudaImo2,
        }
    }
}

impl SendDriver for FukudaEcgSender {
    fn model(&self) -> DeviceModel {
        self.model
    }

    fn compose(&self, params: &ValueVector) -> Result<Vec<u8>, ProtocolError> {
        let birth = BirthDate::from_param(params, 5)?;
        let number = params.get(1).trim();
        // age is sent without its last digit
        let age: String = pad_left_zero(params.get(6).trim(), 3).chars().take(2).collect();

        let body = [
            HEADER.to_string(),
            shifted_name(params.get(3), 20),
            pad_left_zero(number, 10),
            birth.dotted(),
            sex_letter(params.get(4)).to_string(),
            pad_left_zero(number, 6),
            age,
            "0000.00.00".to_string(),
            " ".repeat(4),
        ]
        .concat();
        Ok(fukuda_frame(&body))
    }
}

// =============================================================================
// Image server
// =============================================================================

/// Fukuda Denshi generic (Image One) and common interfaces.
///
/// Parameters: 1 exam number, 2 examinee sequence, 3 name, 4 sex,
/// 5 birth date.
#[derive(Debug, Clone, Copy)]
pub struct FukudaImageSender {
    model: DeviceModel,
}

impl FukudaImageSender {
    /// Generic interface (Image One).
    pub fn imo() -> Self {
        Self {
            model: DeviceModel::FukudaImo,
        }
    }

    /// Common interface.
    pub fn common() -> Self {
        Self {
            model: DeviceModel::FukudaCmn,
        }
    }
}

impl SendDriver for FukudaImageSender {
    fn model(&self) -> DeviceModel {
        self.model
    }

    fn compose(&self, params: &ValueVector) -> Result<Vec<u8>, ProtocolError> {
        let birth = BirthDate::from_param(params, 5)?;
        let body = [
            HEADER.to_string(),
            pad_left_zero(params.get(2).trim(), 12),
            shifted_name(params.get(3), 24),
            birth.compact(),
            sex_letter(params.get(4)).to_string(),
            pad_left_zero(params.get(1).trim(), 16),
            " ".repeat(4),
        ]
        .concat();
        Ok(fukuda_frame(&body))
    }
}

// =============================================================================
// QR CONNECT
// =============================================================================

/// QR CONNECT camera link (fundus, Image One and gastric X-ray variants).
///
/// Parameters: 1 examinee id, 2 kana name, 3 kanji name, 4 birth date,
/// 5 sex code (sent as is), 6 accession number.
#[derive(Debug, Clone, Copy)]
pub struct QrConnectSender {
    model: DeviceModel,
}

impl QrConnectSender {
    /// Sender for one of the QR CONNECT models.
    ///
    /// Returns `None` for models that are not QR CONNECT variants.
    pub fn new(model: DeviceModel) -> Option<Self> {
        matches!(
            model,
            DeviceModel::QrConnect | DeviceModel::QrConnectImo | DeviceModel::QrConnectDr
        )
        .then_some(Self { model })
    }
}

impl SendDriver for QrConnectSender {
    fn model(&self) -> DeviceModel {
        self.model
    }

    fn compose(&self, params: &ValueVector) -> Result<Vec<u8>, ProtocolError> {
        let birth = BirthDate::from_param(params, 4)?;
        let record = [
            pad_left_zero(params.get(1).trim(), 12),
            pad_right_space(params.get(2), 30),
            pad_right_space(params.get(3), 30),
            birth.compact(),
            params.get(5).trim().to_string(),
            pad_left_zero(params.get(6).trim(), 16),
            " ".repeat(3),
        ]
        .concat();
        Ok(encode(&record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medlink_core::codec::bcc;

    fn ecg_params() -> ValueVector {
        ValueVector::from_slice(&["", "1234", "77", "SUZUKI ICHIRO", "1", "19601105", "63"])
    }

    fn body(frame: &[u8]) -> &[u8] {
        &frame[1..frame.len() - 1]
    }

    #[test]
    fn ecg_frame_layout() {
        let frame = FukudaEcgSender::fcp4521().compose(&ecg_params()).unwrap();
        assert_eq!(frame[0], control::STX);
        assert_eq!(frame[frame.len() - 2], control::ETX);
        assert_eq!(frame.last().copied(), bcc(body(&frame), BccMode::Xor));

        let mut expected = b"A0FUJI\x0eSUZUKI ICHIRO       \x0f".to_vec();
        expected.extend_from_slice(b"00000012341960.11.05M00123406");
        expected.extend_from_slice(b"0000.00.00    \x03");
        assert_eq!(body(&frame), expected.as_slice());
    }

    #[test]
    fn ecg_bcc_covers_everything_after_stx() {
        let frame = FukudaEcgSender::imo2().compose(&ecg_params()).unwrap();
        let check = frame[1..frame.len() - 1].iter().fold(0u8, |acc, b| acc ^ b);
        assert_eq!(frame.last(), Some(&check));
    }

    #[test]
    fn image_frame_layout() {
        let frame = FukudaImageSender::imo().compose(&ecg_params()).unwrap();
        let mut expected = b"A0FUJI000000000077\x0e".to_vec();
        expected.extend_from_slice(format!("{:<24}", "SUZUKI ICHIRO").as_bytes());
        expected.extend_from_slice(b"\x0f19601105M0000000000001234    \x03");
        assert_eq!(body(&frame), expected.as_slice());
        assert_eq!(FukudaImageSender::common().model(), DeviceModel::FukudaCmn);
    }

    #[test]
    fn qr_connect_record() {
        let params = ValueVector::from_slice(&[
            "", "55", "YAMADA HANAKO", "HANAKO", "19900214", "2", "20240401001",
        ]);
        let sender = QrConnectSender::new(DeviceModel::QrConnectDr).unwrap();
        let record = String::from_utf8(sender.compose(&params).unwrap()).unwrap();
        assert_eq!(record.len(), 12 + 30 + 30 + 8 + 1 + 16 + 3);
        assert!(record.starts_with("000000000055YAMADA HANAKO"));
        assert!(record.ends_with("1990021420000020240401001   "));
    }

    #[test]
    fn qr_connect_rejects_other_models() {
        assert!(QrConnectSender::new(DeviceModel::Fcp4521).is_none());
    }

    #[test]
    fn missing_birth_date_is_refused() {
        let params = ValueVector::from_slice(&["", "1234", "77", "SUZUKI", "1", ""]);
        let err = FukudaImageSender::imo().compose(&params).unwrap_err();
        assert_eq!(err.result_code(), medlink_core::ResultCode::Cancelled);
    }
}
