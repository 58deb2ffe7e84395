//! Static currency metadata: display name, symbol and decimal places.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyInfo {
    pub code: &'static str,
    pub name: &'static str,
    pub symbol: &'static str,
    pub decimal_places: usize,
}

// (code, name, symbol, decimal places)
const BUILTIN_CURRENCIES: &[(&str, &str, &str, usize)] = &[
    ("USD", "United States Dollar", "$", 2),
    ("GBP", "United Kingdom Pound", "£", 2),
    ("BCH", "Bitcoin Cash", "BCH", 8),
    ("CAD", "Canada Dollar", "$", 2),
    ("EUR", "Euro Member Countries", "€", 2),
    ("HKD", "Hong Kong Dollar", "$", 2),
    ("JPY", "Japan Yen", "¥", 0),
    ("KRW", "Korea (South) Won", "₩", 0),
    ("NZD", "New Zealand Dollar", "$", 2),
    ("SEK", "Sweden Krona", "kr", 2),
    ("CHF", "Switzerland Franc", "CHF", 2),
    ("ALL", "Albania Lek", "Lek", 2),
    ("AFN", "Afghanistan Afghani", "؋", 2),
    ("ARS", "Argentina Peso", "$", 2),
    ("AWG", "Aruba Guilder", "ƒ", 2),
    ("AUD", "Australia Dollar", "$", 2),
    ("AZN", "Azerbaijan Manat", "₼", 2),
    ("BSD", "Bahamas Dollar", "$", 2),
    ("BBD", "Barbados Dollar", "$", 2),
    ("BYN", "Belarus Ruble", "Br", 2),
    ("BZD", "Belize Dollar", "BZ$", 2),
    ("BMD", "Bermuda Dollar", "$", 2),
    ("BOB", "Bolivia Bolíviano", "$b", 2),
    ("BAM", "Bosnia and Herzegovina Convertible Marka", "KM", 2),
    ("BWP", "Botswana Pula", "P", 2),
    ("BGN", "Bulgaria Lev", "лв", 2),
    ("BRL", "Brazil Real", "R$", 2),
    ("BND", "Brunei Darussalam Dollar", "$", 2),
    ("KHR", "Cambodia Riel", "៛", 2),
    ("KYD", "Cayman Islands Dollar", "$", 2),
    ("CLP", "Chile Peso", "$", 0),
    ("CNY", "China Yuan Renminbi", "¥", 2),
    ("COP", "Colombia Peso", "$", 2),
    ("CRC", "Costa Rica Colon", "₡", 2),
    ("HRK", "Croatia Kuna", "kn", 2),
    ("CUP", "Cuba Peso", "₱", 2),
    ("CZK", "Czech Republic Koruna", "Kč", 2),
    ("DKK", "Denmark Krone", "kr", 2),
    ("DOP", "Dominican Republic Peso", "RD$", 2),
    ("XCD", "East Caribbean Dollar", "$", 2),
    ("EGP", "Egypt Pound", "£", 2),
    ("SVC", "El Salvador Colon", "$", 2),
    ("FKP", "Falkland Islands (Malvinas) Pound", "£", 2),
    ("FJD", "Fiji Dollar", "$", 2),
    ("GHS", "Ghana Cedi", "¢", 2),
    ("GIP", "Gibraltar Pound", "£", 2),
    ("GTQ", "Guatemala Quetzal", "Q", 2),
    ("GGP", "Guernsey Pound", "£", 2),
    ("GYD", "Guyana Dollar", "$", 2),
    ("HNL", "Honduras Lempira", "L", 2),
    ("HUF", "Hungary Forint", "Ft", 2),
    ("ISK", "Iceland Krona", "kr", 2),
    ("INR", "India Rupee", "₹", 2),
    ("IDR", "Indonesia Rupiah", "Rp", 0),
    ("IRR", "Iran Rial", "﷼", 2),
    ("IMP", "Isle of Man Pound", "£", 2),
    ("ILS", "Israel Shekel", "₪", 2),
    ("JMD", "Jamaica Dollar", "J$", 2),
    ("JEP", "Jersey Pound", "£", 2),
    ("KZT", "Kazakhstan Tenge", "лв", 2),
    ("KPW", "Korea (North) Won", "₩", 2),
    ("KGS", "Kyrgyzstan Som", "лв", 2),
    ("LAK", "Laos Kip", "₭", 2),
    ("LBP", "Lebanon Pound", "£", 2),
    ("LRD", "Liberia Dollar", "$", 2),
    ("MKD", "Macedonia Denar", "ден", 2),
    ("MYR", "Malaysia Ringgit", "RM", 2),
    ("MUR", "Mauritius Rupee", "₨", 2),
    ("MXN", "Mexico Peso", "$", 2),
    ("MNT", "Mongolia Tughrik", "₮", 2),
    ("MZN", "Mozambique Metical", "MT", 2),
    ("NAD", "Namibia Dollar", "$", 2),
    ("NPR", "Nepal Rupee", "₨", 2),
    ("ANG", "Netherlands Antilles Guilder", "ƒ", 2),
    ("NIO", "Nicaragua Cordoba", "C$", 2),
    ("NGN", "Nigeria Naira", "₦", 2),
    ("NOK", "Norway Krone", "kr", 2),
    ("OMR", "Oman Rial", "﷼", 2),
    ("PKR", "Pakistan Rupee", "₨", 0),
    ("PAB", "Panama Balboa", "B/.", 2),
    ("PYG", "Paraguay Guarani", "Gs", 2),
    ("PEN", "Peru Sol", "S/.", 2),
    ("PHP", "Philippines Peso", "₱", 2),
    ("PLN", "Poland Zloty", "zł", 2),
    ("QAR", "Qatar Riyal", "﷼", 2),
    ("RON", "Romania Leu", "lei", 2),
    ("RUB", "Russia Ruble", "₽", 2),
    ("SHP", "Saint Helena Pound", "£", 2),
    ("SAR", "Saudi Arabia Riyal", "﷼", 2),
    ("RSD", "Serbia Dinar", "Дин.", 0),
    ("SCR", "Seychelles Rupee", "₨", 2),
    ("SGD", "Singapore Dollar", "$", 2),
    ("SBD", "Solomon Islands Dollar", "$", 2),
    ("SOS", "Somalia Shilling", "S", 2),
    ("ZAR", "South Africa Rand", "R", 2),
    ("LKR", "Sri Lanka Rupee", "₨", 2),
    ("SRD", "Suriname Dollar", "$", 2),
    ("SYP", "Syria Pound", "£", 2),
    ("TWD", "Taiwan New Dollar", "NT$", 2),
    ("THB", "Thailand Baht", "฿", 2),
    ("TTD", "Trinidad and Tobago Dollar", "TT$", 2),
    ("TRY", "Turkey Lira", "₺", 2),
    ("TVD", "Tuvalu Dollar", "$", 2),
    ("UAH", "Ukraine Hryvnia", "₴", 2),
    ("UYU", "Uruguay Peso", "$U", 2),
    ("UZS", "Uzbekistan Som", "лв", 2),
    ("VEF", "Venezuela Bolívar", "Bs", 2),
    ("VND", "Viet Nam Dong", "₫", 2),
    ("YER", "Yemen Rial", "﷼", 2),
    ("ZWD", "Zimbabwe Dollar", "Z$", 0),];

/// Lookup table over currency metadata, keyed by ISO code.
#[derive(Debug, Clone)]
pub struct CurrencyTable {
    order: Vec<&'static str>,
    by_code: HashMap<&'static str, CurrencyInfo>,
}

impl CurrencyTable {
    pub fn builtin() -> Self {
        Self::from_infos(BUILTIN_CURRENCIES.iter().map(|&(code, name, symbol, decimal_places)| {
            CurrencyInfo {
                code,
                name,
                symbol,
                decimal_places,
            }
        }))
    }

    pub fn from_infos(infos: impl IntoIterator<Item = CurrencyInfo>) -> Self {
        let mut order = Vec::new();
        let mut by_code = HashMap::new();
        for info in infos {
            if by_code.insert(info.code, info.clone()).is_none() {
                order.push(info.code);
            }
        }
        Self { order, by_code }
    }

    pub fn get(&self, code: &str) -> Option<&CurrencyInfo> {
        self.by_code.get(code)
    }

    pub fn symbol_for(&self, code: &str) -> Option<&'static str> {
        self.get(code).map(|info| info.symbol)
    }

    pub fn decimal_places_for(&self, code: &str) -> Option<usize> {
        self.get(code).map(|info| info.decimal_places)
    }

    pub fn is_known(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    /// Known codes in table order.
    pub fn known_codes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.order.iter().copied()
    }
}

impl Default for CurrencyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let table = CurrencyTable::builtin();

        assert_eq!(table.symbol_for("USD"), Some("$"));
        assert_eq!(table.decimal_places_for("JPY"), Some(0));
        assert_eq!(table.decimal_places_for("EUR"), Some(2));
        assert_eq!(table.symbol_for("XXX"), None);
        assert_eq!(table.known_codes().next(), Some("USD"));
    }

    #[test]
    fn test_every_builtin_has_a_symbol() {
        let table = CurrencyTable::builtin();
        for code in table.known_codes() {
            assert!(!table.symbol_for(code).unwrap().is_empty(), "{} has no symbol", code);
        }
    }
}
