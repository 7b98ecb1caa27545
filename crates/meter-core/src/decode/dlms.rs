//! HDLC + DLMS binary telegram decoder.
//!
//! The frame is an HDLC type-3 frame (flag byte 0x7E at both ends, format
//! word with upper nibble 0xA and an 11-bit length). After the variable
//! address fields, the control byte, header checksum and LLC header, the
//! embedded DLMS APDU is scanned for OBIS registers encoded as six-byte
//! octet strings followed by a data value and an optional scale/unit
//! structure.

use chrono::{TimeZone, Utc};

use super::DecodeError;
use crate::frame::FrameView;
use crate::reading::{MAX_DEVICE_ID_LEN, Reading};

const FRAME_FLAG: u8 = 0x7E;
const MIN_FRAME_LEN: usize = 20;

// DLMS data tags
const DATA_NULL: u8 = 0x00;
const DATA_LONG_DOUBLE_UNSIGNED: u8 = 0x06; // 32-bit unsigned
const DATA_OCTET_STRING: u8 = 0x09;
const DATA_INTEGER: u8 = 0x10; // 16-bit signed
const DATA_UNSIGNED: u8 = 0x11; // 8-bit unsigned
const DATA_LONG_UNSIGNED: u8 = 0x12; // 16-bit unsigned

const OBIS_CODE_LEN: usize = 6;

// DLMS unit codes used by the kilo-prefix adjustment.
const UNIT_AMPERE: u8 = 0x21;
const UNIT_VOLT: u8 = 0x23;

/// Unit strings for known `1-0:C.D.*` registers.
const CD_UNITS: &[(u8, u8, &str)] = &[
    (1, 8, "kWh"),
    (2, 8, "kWh"),
    (3, 8, "kVARh"),
    (4, 8, "kVARh"),
    (1, 7, "kW"),
    (2, 7, "kW"),
    (3, 7, "kVAR"),
    (4, 7, "kVAR"),
    (21, 7, "kW"),
    (41, 7, "kW"),
    (61, 7, "kW"),
    (22, 7, "kW"),
    (42, 7, "kW"),
    (62, 7, "kW"),
    (23, 7, "kVAR"),
    (43, 7, "kVAR"),
    (63, 7, "kVAR"),
    (24, 7, "kVAR"),
    (44, 7, "kVAR"),
    (64, 7, "kVAR"),
    (32, 7, "V"),
    (52, 7, "V"),
    (72, 7, "V"),
    (31, 7, "A"),
    (51, 7, "A"),
    (71, 7, "A"),
];

fn unit_for(c: u8, d: u8) -> &'static str {
    CD_UNITS
        .iter()
        .find(|(uc, ud, _)| *uc == c && *ud == d)
        .map_or("UNKNOWN", |(_, _, u)| u)
}

/// Decode one HDLC/DLMS frame into `reading`.
pub fn decode(view: &FrameView<'_>, reading: &mut Reading) -> Result<(), DecodeError> {
    let size = view.len();
    if size < MIN_FRAME_LEN {
        return Err(DecodeError::BadFraming("frame too short"));
    }
    if view.byte(0) != FRAME_FLAG || view.byte(size - 1) != FRAME_FLAG {
        return Err(DecodeError::BadFraming("missing HDLC flags"));
    }

    // Format word: upper nibble 0xA marks a type-3 frame, low 11 bits carry
    // the frame length (excluding the flags).
    if view.byte(1) & 0xF0 != 0xA0 {
        return Err(DecodeError::BadFraming("not a type-3 frame"));
    }
    let declared = (usize::from(u16::from_be_bytes([view.byte(1), view.byte(2)]) & 0x07FF)) + 2;
    if declared > size {
        return Err(DecodeError::BadFraming("declared length exceeds frame"));
    }

    // Destination then source address: variable length, the final byte of
    // each has its low bit set.
    let mut pos = 3;
    for _ in 0..2 {
        while pos < size && view.byte(pos) & 0x01 == 0 {
            pos += 1;
        }
        pos += 1;
    }

    // Control byte + HCS, then the 3-byte LLC header.
    pos += 3 + 3;
    if pos >= size {
        return Err(DecodeError::BadFraming("truncated header"));
    }

    decode_apdu(view, pos, reading)
}

/// Scan the APDU for octet-string OBIS markers and their values.
fn decode_apdu(
    view: &FrameView<'_>,
    start: usize,
    reading: &mut Reading,
) -> Result<(), DecodeError> {
    let size = view.len();
    let mut pos = start;
    let mut data_found = false;

    while pos + 10 < size {
        let before = pos;

        if view.byte(pos) == DATA_OCTET_STRING && usize::from(view.byte(pos + 1)) == OBIS_CODE_LEN {
            let mut obis = [0u8; OBIS_CODE_LEN];
            for (i, b) in obis.iter_mut().enumerate() {
                *b = view.byte(pos + 2 + i);
            }
            pos += 2 + OBIS_CODE_LEN;

            let tag = view.byte(pos);
            pos += 1;
            if process_value(view, &mut pos, tag, &obis, reading) {
                data_found = true;
            }
        } else {
            pos += 1;
        }

        // Progress guard against malformed length fields.
        if pos == before {
            pos += 1;
        }
    }

    if data_found {
        Ok(())
    } else {
        Err(DecodeError::NoData)
    }
}

/// Decode one data value at `*pos`, advancing the cursor past the value and
/// any trailing scale/unit structure. Returns true when a field of the
/// reading was populated.
fn process_value(
    view: &FrameView<'_>,
    pos: &mut usize,
    tag: u8,
    obis: &[u8; OBIS_CODE_LEN],
    reading: &mut Reading,
) -> bool {
    match tag {
        DATA_NULL => false,
        DATA_INTEGER | DATA_UNSIGNED | DATA_LONG_UNSIGNED | DATA_LONG_DOUBLE_UNSIGNED => {
            let width = numeric_width(tag);
            if *pos + width > view.len() {
                return false;
            }
            let raw = read_numeric(view, *pos, tag);
            *pos += width;

            let value = apply_scaling(view, pos, raw);

            // Only 1-0:* registers map onto OBIS value rows.
            if obis[0] == 1 && obis[1] == 0 {
                let (c, d) = (obis[2], obis[3]);
                reading.push_obis_value(c, d, value, unit_for(c, d))
            } else {
                false
            }
        }
        DATA_OCTET_STRING => {
            if *pos >= view.len() {
                return false;
            }
            let len = usize::from(view.byte(*pos));
            *pos += 1;
            if *pos + len > view.len() {
                return false;
            }
            let handled = process_octet_string(view, *pos, len, obis, reading);
            *pos += len;
            handled
        }
        _ => false,
    }
}

fn numeric_width(tag: u8) -> usize {
    match tag {
        DATA_UNSIGNED => 1,
        DATA_INTEGER | DATA_LONG_UNSIGNED => 2,
        DATA_LONG_DOUBLE_UNSIGNED => 4,
        _ => 0,
    }
}

fn read_numeric(view: &FrameView<'_>, pos: usize, tag: u8) -> f64 {
    match tag {
        DATA_UNSIGNED => f64::from(view.byte(pos)),
        DATA_INTEGER => f64::from(i16::from_be_bytes([view.byte(pos), view.byte(pos + 1)])),
        DATA_LONG_UNSIGNED => f64::from(u16::from_be_bytes([view.byte(pos), view.byte(pos + 1)])),
        DATA_LONG_DOUBLE_UNSIGNED => f64::from(u32::from_be_bytes([
            view.byte(pos),
            view.byte(pos + 1),
            view.byte(pos + 2),
            view.byte(pos + 3),
        ])),
        _ => 0.0,
    }
}

/// Parse the optional structure after a numeric value: tag 0x02, element
/// count, then scale (0x0F, signed) and unit (0x16) elements. The final
/// value is `raw * 10^scale`, with a kilo-prefix adjustment when the meter
/// reports scale 0 for anything that is not a current or voltage register.
fn apply_scaling(view: &FrameView<'_>, pos: &mut usize, raw: f64) -> f64 {
    if *pos + 2 > view.len() || view.byte(*pos) != 0x02 {
        return raw;
    }

    let elements = usize::from(view.byte(*pos + 1));
    *pos += 2;

    let mut scale: i8 = 0;
    let mut unit: u8 = 0;
    for _ in 0..elements {
        if *pos >= view.len() {
            break;
        }
        let tag = view.byte(*pos);
        *pos += 1;
        match tag {
            0x0F => {
                scale = view.byte(*pos) as i8;
                *pos += 1;
            }
            0x16 => {
                unit = view.byte(*pos);
                *pos += 1;
            }
            _ => {
                *pos += 1;
            }
        }
    }

    let mut scale = i32::from(scale);
    if scale == 0 && unit != UNIT_AMPERE && unit != UNIT_VOLT {
        // Registers reported in base units (Wh, W) are published with a
        // kilo prefix.
        scale = -3;
    }
    raw * 10f64.powi(scale.clamp(-4, 5))
}

fn process_octet_string(
    view: &FrameView<'_>,
    pos: usize,
    len: usize,
    obis: &[u8; OBIS_CODE_LEN],
    reading: &mut Reading,
) -> bool {
    // 12-byte clock value at 0-0:1.0.0.
    if len == 12 && obis[0] == 0 && obis[1] == 0 && obis[2] == 1 && obis[3] == 0 {
        let year = u16::from_be_bytes([view.byte(pos), view.byte(pos + 1)]);
        let month = view.byte(pos + 2);
        let day = view.byte(pos + 3);
        // pos + 4 is the day-of-week, which is not used.
        let hour = view.byte(pos + 5);
        let minute = view.byte(pos + 6);
        let second = view.byte(pos + 7);

        let Some(dt) = Utc
            .with_ymd_and_hms(
                i32::from(year),
                u32::from(month),
                u32::from(day),
                u32::from(hour),
                u32::from(minute),
                u32::from(second),
            )
            .single()
        else {
            return false;
        };
        reading.set_timestamp(dt.timestamp());
        reading.push_obis(&format!(
            "0-0:1.0.0({:02}{:02}{:02}{:02}{:02}{:02}W)",
            year % 100,
            month,
            day,
            hour,
            minute,
            second
        ));
        return true;
    }

    // Equipment identifier at 0-0:96.1.1.
    if obis[0] == 0 && obis[1] == 0 && obis[2] == 96 && obis[3] == 1 {
        if len >= MAX_DEVICE_ID_LEN {
            return false;
        }
        let mut id = String::with_capacity(len);
        for i in 0..len {
            let b = view.byte(pos + i);
            if b == 0 {
                break;
            }
            id.push(b as char);
        }
        reading.set_device_id(&id);
        return true;
    }

    false
}
