use crate::error::{CssdError, CssdResult};
use crate::workflow::ItemType;

const BASKET_PREFIX: &str = "BSK";
const STERILE_PACK_PREFIX: &str = "SP-";
const TRAY_PREFIX: &str = "ITR";

/// Normalize a raw scanner token: trimmed and upper-cased
pub fn normalize_token(token: &str) -> String {
    token.trim().to_ascii_uppercase()
}

/// Classify a barcode token by its prefix convention.
///
/// `BSK*` is a basket, `SP-*` a sterile pack and `ITR*` an instrument tray.
/// A bare prefix without a serial part is rejected.
pub fn classify_scan(token: &str) -> CssdResult<ItemType> {
    let token = normalize_token(token);
    if token.is_empty() {
        return Err(CssdError::validation("scan", "empty barcode"));
    }

    let prefixes = [
        (BASKET_PREFIX, ItemType::Basket),
        (STERILE_PACK_PREFIX, ItemType::SterilePack),
        (TRAY_PREFIX, ItemType::InstrumentTray),
    ];

    for (prefix, item_type) in prefixes {
        if let Some(serial) = token.strip_prefix(prefix) {
            if serial.is_empty() {
                return Err(CssdError::validation(
                    "scan",
                    format!("barcode '{token}' has no serial after prefix {prefix}"),
                ));
            }
            return Ok(item_type);
        }
    }

    Err(CssdError::validation(
        "scan",
        format!("unrecognised barcode prefix in '{token}'"),
    ))
}
