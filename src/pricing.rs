//! # Pricing: Monthly Rates and the Option Catalog
//!
//! Installations are priced per month on a three-year contract, keyed only
//! by the total camera count (indoor + outdoor). The table covers 2..=16
//! cameras; larger sites go to a consultant for a manual quote. IoT and
//! special-construction options are recorded but never priced here, since
//! their cost varies with the market ("시세변동").

use serde::Serialize;

use crate::error::ApiError;

pub const MIN_CAMERAS: u32 = 2;
pub const MAX_PRICED_CAMERAS: u32 = 16;
pub const DEFAULT_CAMERA_TYPE: &str = "210만";
pub const MANUAL_QUOTE_MESSAGE: &str = "16대 이상은 상담원에게 문의해 주세요";
pub const OPTION_PRICE_NOTE: &str = "시세변동";

/// KRW per month for the 210만화소 package, indexed by total cameras.
const PRICE_TABLE: [(u32, u32); 15] = [
    (2, 22_000),
    (3, 26_000),
    (4, 30_000),
    (5, 36_000),
    (6, 40_000),
    (7, 44_000),
    (8, 48_000),
    (9, 60_000),
    (10, 64_000),
    (11, 68_000),
    (12, 72_000),
    (13, 76_000),
    (14, 80_000),
    (15, 84_000),
    (16, 88_000),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogOption {
    pub key: &'static str,
    pub label: &'static str,
}

pub const IOT_OPTIONS: [CatalogOption; 6] = [
    CatalogOption { key: "fingerprint", label: "지문형 출입통제" },
    CatalogOption { key: "card", label: "카드형 출입통제" },
    CatalogOption { key: "door", label: "문열림 감지센서" },
    CatalogOption { key: "motion", label: "움직임 감지센서" },
    CatalogOption { key: "fire", label: "화재 경보 센서" },
    CatalogOption { key: "temp", label: "온도 감지 센서" },
];

pub const SPECIAL_OPTIONS: [CatalogOption; 5] = [
    CatalogOption { key: "height", label: "층고 4m 이상" },
    CatalogOption { key: "elevator", label: "엘리베이터 공사" },
    CatalogOption { key: "pipe", label: "특수 배관 공사" },
    CatalogOption { key: "pole", label: "폴대 (SUS)" },
    CatalogOption { key: "sky", label: "탑차 (스카이차, 탑차)" },
];

/// Outcome of pricing a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    Monthly(u32),
    /// More than [`MAX_PRICED_CAMERAS`]; still submittable, price left blank.
    Manual,
}

impl Quote {
    pub fn price(&self) -> Option<u32> {
        match self {
            Quote::Monthly(p) => Some(*p),
            Quote::Manual => None,
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Quote::Manual)
    }
}

/// Table lookup for a total count. `None` outside 2..=16.
pub fn monthly_price(total_cameras: u32) -> Option<u32> {
    PRICE_TABLE
        .iter()
        .find(|(count, _)| *count == total_cameras)
        .map(|(_, price)| *price)
}

/// Price a selection, refusing fewer than two cameras.
pub fn quote(indoor: u32, outdoor: u32) -> Result<Quote, ApiError> {
    let total = indoor.saturating_add(outdoor);
    if total < MIN_CAMERAS {
        return Err(ApiError::validation(format!(
            "At least {} cameras are required (got {})",
            MIN_CAMERAS, total
        )));
    }
    Ok(match monthly_price(total) {
        Some(price) => Quote::Monthly(price),
        None => Quote::Manual,
    })
}

/// Map an option key to its display label. Unknown keys pass through, so
/// clients that already send labels keep working.
pub fn option_label<'a>(catalog: &[CatalogOption], key: &'a str) -> &'a str {
    catalog
        .iter()
        .find(|o| o.key == key)
        .map(|o| o.label)
        .unwrap_or(key)
}

#[derive(Debug, Serialize)]
pub struct PriceRow {
    pub cameras: u32,
    pub monthly: u32,
}

/// Everything a client needs to render the first wizard step.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingCatalog {
    pub camera_types: Vec<&'static str>,
    pub default_camera_type: &'static str,
    pub min_cameras: u32,
    pub max_priced_cameras: u32,
    pub manual_quote_message: &'static str,
    pub prices: Vec<PriceRow>,
    pub iot_options: Vec<CatalogOption>,
    pub special_options: Vec<CatalogOption>,
    pub option_price_note: &'static str,
    pub time_slots: crate::calendar::TimeSlots,
}

pub fn catalog() -> PricingCatalog {
    PricingCatalog {
        camera_types: vec![DEFAULT_CAMERA_TYPE],
        default_camera_type: DEFAULT_CAMERA_TYPE,
        min_cameras: MIN_CAMERAS,
        max_priced_cameras: MAX_PRICED_CAMERAS,
        manual_quote_message: MANUAL_QUOTE_MESSAGE,
        prices: PRICE_TABLE
            .iter()
            .map(|&(cameras, monthly)| PriceRow { cameras, monthly })
            .collect(),
        iot_options: IOT_OPTIONS.to_vec(),
        special_options: SPECIAL_OPTIONS.to_vec(),
        option_price_note: OPTION_PRICE_NOTE,
        time_slots: crate::calendar::time_slots(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_exact() {
        let expected = [
            22000, 26000, 30000, 36000, 40000, 44000, 48000, 60000, 64000, 68000, 72000, 76000,
            80000, 84000, 88000,
        ];
        for (i, price) in expected.iter().enumerate() {
            assert_eq!(monthly_price(i as u32 + 2), Some(*price));
        }
    }

    #[test]
    fn fewer_than_two_refused() {
        assert!(matches!(quote(0, 0), Err(ApiError::Validation(_))));
        assert!(matches!(quote(1, 0), Err(ApiError::Validation(_))));
        assert!(matches!(quote(0, 1), Err(ApiError::Validation(_))));
    }

    #[test]
    fn more_than_sixteen_is_manual() {
        assert_eq!(quote(10, 7).unwrap(), Quote::Manual);
        assert_eq!(quote(10, 7).unwrap().price(), None);
        assert_eq!(monthly_price(17), None);
    }

    #[test]
    fn four_indoor_three_outdoor() {
        assert_eq!(quote(4, 3).unwrap(), Quote::Monthly(44000));
    }

    #[test]
    fn option_labels_resolve() {
        assert_eq!(option_label(&IOT_OPTIONS, "fire"), "화재 경보 센서");
        assert_eq!(option_label(&SPECIAL_OPTIONS, "sky"), "탑차 (스카이차, 탑차)");
        assert_eq!(option_label(&IOT_OPTIONS, "지문형 출입통제"), "지문형 출입통제");
    }

    #[test]
    fn catalog_lists_every_row() {
        let c = catalog();
        assert_eq!(c.prices.len(), 15);
        assert_eq!(c.iot_options.len(), 6);
        assert_eq!(c.special_options.len(), 5);
        assert_eq!(c.default_camera_type, "210만");
    }
}
