//! Fixed business tables: shipment statuses and extra-service categories.

use super::models::ExtraService;
use serde_json::Value;

/// Shipment status, ordered by progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShipmentStatus {
    New = 1,
    Transfer = 2,
    Delivery = 3,
    Delivered = 4,
    Failed = 5,
    Returned = 6,
}

impl ShipmentStatus {
    pub const ALL: [ShipmentStatus; 6] = [
        Self::New,
        Self::Transfer,
        Self::Delivery,
        Self::Delivered,
        Self::Failed,
        Self::Returned,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Human-readable label
    pub fn title(self) -> &'static str {
        match self {
            Self::New => "Mới",
            Self::Transfer => "Đang chuyển tiếp",
            Self::Delivery => "Đi phát",
            Self::Delivered => "Phát thành công",
            Self::Failed => "Phát thất bại",
            Self::Returned => "Hoàn lại",
        }
    }

    /// Carrier status key
    pub fn key(self) -> &'static str {
        match self {
            Self::New => "DATIEPNHAN",
            Self::Transfer => "DANGVANCHUYEN",
            Self::Delivery => "DANGDIPHAT",
            Self::Delivered => "PHATTHANHCONG",
            Self::Failed => "PHATTHATBAI",
            Self::Returned => "CHOCHUYENHOAN",
        }
    }

    pub fn from_id(id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|status| u64::from(status.id()) == id)
    }

    /// Resolve a numeric id, a carrier key or a label (case-insensitive)
    pub fn resolve(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(id) = raw.parse::<u64>() {
            return Self::from_id(id);
        }

        let lowered = raw.to_lowercase();
        Self::ALL.into_iter().find(|status| {
            status.key().eq_ignore_ascii_case(raw) || status.title().to_lowercase() == lowered
        })
    }

    /// Resolve from a JSON number or string
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().and_then(Self::from_id),
            Value::String(s) => Self::resolve(s),
            _ => None,
        }
    }

    /// Whether delivery has been attempted
    pub fn is_final(self) -> bool {
        self >= Self::Delivered
    }
}

/// One entry of the extra-service catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCategory {
    pub id: u32,
    pub codes: &'static [&'static str],
    pub name: &'static str,
}

pub const SERVICE_CATEGORIES: [ServiceCategory; 12] = [
    ServiceCategory { id: 1, codes: &["PHG"], name: "Phát hẹn giờ" },
    ServiceCategory { id: 2, codes: &["DE"], name: "Chuyển phát nhanh" },
    ServiceCategory { id: 3, codes: &["HT"], name: "Hỏa tốc" },
    ServiceCategory { id: 4, codes: &["TF"], name: "Vận tải chậm" },
    ServiceCategory { id: 5, codes: &["PTT"], name: "Phát tận tay" },
    ServiceCategory { id: 6, codes: &["BP"], name: "Báo phát" },
    ServiceCategory { id: 7, codes: &["DK"], name: "Đồng kiểm" },
    ServiceCategory {
        id: 8,
        codes: &["DVTK", "DVTKKH", "TKKH"],
        name: "Dịch vụ thư ký khách hàng",
    },
    ServiceCategory { id: 9, codes: &["PTN"], name: "Phát trong ngày" },
    ServiceCategory { id: 10, codes: &["PUT"], name: "Phát ưu tiên" },
    ServiceCategory { id: 11, codes: &["HDL"], name: "Hàng đông lạnh" },
    ServiceCategory { id: 12, codes: &["HST"], name: "Hồ sơ thầu" },
];

pub fn find_category(code: &str) -> Option<&'static ServiceCategory> {
    SERVICE_CATEGORIES
        .iter()
        .find(|category| category.codes.iter().any(|c| c.eq_ignore_ascii_case(code)))
}

/// Split a combined category string such as `"PHG+DE"` into catalog entries.
///
/// Segments are separated by `+` or `,`, matched case-insensitively and
/// returned in input order. Unknown segments are dropped.
pub fn parse_extra_services(raw: &str) -> Vec<ExtraService> {
    raw.split(|c| c == '+' || c == ',')
        .map(|segment| segment.trim().to_uppercase())
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| {
            find_category(&segment).map(|category| ExtraService {
                id: category.id,
                code: segment,
                name: category.name.to_string(),
            })
        })
        .collect()
}
