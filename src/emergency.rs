/// Country shown when none has been picked.
pub const DEFAULT_COUNTRY: &str = "Saudi Arabia";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmergencyContact {
    pub country: &'static str,
    pub number: &'static str,
    pub flag: &'static str,
}

const CONTACTS: &[EmergencyContact] = &[
    EmergencyContact { country: "Saudi Arabia", number: "997", flag: "🇸🇦" },
    EmergencyContact { country: "United States", number: "911", flag: "🇺🇸" },
    EmergencyContact { country: "United Kingdom", number: "999", flag: "🇬🇧" },
    EmergencyContact { country: "Canada", number: "911", flag: "🇨🇦" },
    EmergencyContact { country: "Australia", number: "000", flag: "🇦🇺" },
    EmergencyContact { country: "UAE", number: "999", flag: "🇦🇪" },
    EmergencyContact { country: "Kuwait", number: "112", flag: "🇰🇼" },
    EmergencyContact { country: "Bahrain", number: "999", flag: "🇧🇭" },
    EmergencyContact { country: "Qatar", number: "999", flag: "🇶🇦" },
    EmergencyContact { country: "Oman", number: "999", flag: "🇴🇲" },
];

pub fn all() -> &'static [EmergencyContact] {
    CONTACTS
}

/// Case-insensitive lookup by country name.
pub fn lookup(country: &str) -> Option<&'static EmergencyContact> {
    let wanted = country.trim();
    CONTACTS
        .iter()
        .find(|contact| contact.country.eq_ignore_ascii_case(wanted))
}
