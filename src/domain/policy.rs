//! Parsers for the free-text blocks of the policy flows.

use crate::db::types::{Payment, Service, UploadedFile};
use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use std::sync::LazyLock;

static FIELD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([^:]+?)\s*:\s*(.*?)\s*$").unwrap());

static POLICY_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9-]{0,29}$").unwrap());

/// Data needed to create a policy.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewPolicy {
    pub number: String,
    pub holder: String,
    pub phone: Option<String>,
    pub insurer: String,
    pub agent: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub color: Option<String>,
    pub serie: Option<String>,
    pub plates: Option<String>,
    pub files: Vec<UploadedFile>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    /// Great-circle distance in kilometres.
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;

        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }

    pub fn maps_url(&self) -> String {
        format!("https://www.google.com/maps?q={:.6},{:.6}", self.lat, self.lon)
    }
}

/// Field keys in lower case without accents, so `Póliza` and `poliza` match.
fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// `campo: valor` pairs of a multi-line block. Lines without a colon are skipped.
fn field_lines(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| FIELD_LINE.captures(line))
        .map(|caps| (normalize_key(&caps[1]), caps[2].to_string()))
        .filter(|(_, value)| !value.is_empty())
        .collect()
}

pub fn normalize_policy_number(raw: &str) -> Option<String> {
    let number = raw.trim().to_uppercase();
    POLICY_NUMBER.is_match(&number).then_some(number)
}

/// One or more policy numbers separated by commas, spaces or new lines.
pub fn parse_policy_numbers(text: &str) -> Result<Vec<String>, String> {
    let mut numbers: Vec<String> = Vec::new();
    for token in text.split(|c: char| c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        let number = normalize_policy_number(token)
            .ok_or_else(|| format!("\"{}\" no es un número de póliza válido.", token))?;
        if !numbers.contains(&number) {
            numbers.push(number);
        }
    }

    if numbers.is_empty() {
        return Err("Escribe al menos un número de póliza.".to_string());
    }
    Ok(numbers)
}

/// Accepts `dd/mm/yyyy` and `dd-mm-yyyy`.
pub fn parse_date(text: &str) -> Result<NaiveDate, String> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d-%m-%Y"))
        .map_err(|_| format!("\"{}\" no es una fecha válida (dd/mm/aaaa).", text))
}

fn parse_amount(text: &str) -> Result<f64, String> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();
    match cleaned.parse::<f64>() {
        Ok(amount) if amount > 0.0 && amount.is_finite() => Ok(amount),
        _ => Err(format!("\"{}\" no es un monto válido.", text.trim())),
    }
}

/// Mexican phone numbers: ten digits once separators are removed.
pub fn parse_phone(text: &str) -> Result<String, String> {
    let digits: String = text
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if digits.len() == 10 && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(digits)
    } else {
        Err("El teléfono debe tener 10 dígitos.".to_string())
    }
}

pub fn parse_contact_time(text: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(text.trim(), "%H:%M")
        .map_err(|_| "Escribe la hora de contacto como HH:MM (ej. 14:30).".to_string())
}

/// `lat,lon` as typed or pasted from a maps app.
pub fn parse_coordinates(text: &str) -> Result<Coordinates, String> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    let invalid = || "Envía una ubicación o escribe coordenadas como `19.4326,-99.1332`.".to_string();

    let [lat, lon] = parts.as_slice() else {
        return Err(invalid());
    };
    let lat: f64 = lat.parse().map_err(|_| invalid())?;
    let lon: f64 = lon.parse().map_err(|_| invalid())?;

    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Ok(Coordinates { lat, lon })
    } else {
        Err(invalid())
    }
}

/// The `/save` block.
///
/// Required: `poliza`, `titular`, `aseguradora`. Unknown keys are ignored.
pub fn parse_policy_block(text: &str) -> Result<NewPolicy, Vec<String>> {
    let mut policy = NewPolicy::default();
    let mut errors = Vec::new();

    for (key, value) in field_lines(text) {
        match key.as_str() {
            "poliza" | "numero" => match normalize_policy_number(&value) {
                Some(number) => policy.number = number,
                None => errors.push(format!("Número de póliza inválido: {}", value)),
            },
            "titular" | "nombre" => policy.holder = value,
            "aseguradora" => policy.insurer = value,
            "agente" => policy.agent = Some(value),
            "telefono" => match parse_phone(&value) {
                Ok(phone) => policy.phone = Some(phone),
                Err(e) => errors.push(e),
            },
            "fecha" | "fecha de emision" => match parse_date(&value) {
                Ok(date) => policy.issue_date = Some(date),
                Err(e) => errors.push(e),
            },
            "marca" => policy.brand = Some(value),
            "submarca" | "modelo" => policy.model = Some(value),
            "ano" | "anio" => match value.parse::<i32>() {
                Ok(year) => policy.year = Some(year),
                Err(_) => errors.push(format!("Año inválido: {}", value)),
            },
            "color" => policy.color = Some(value),
            "serie" => policy.serie = Some(value.to_uppercase()),
            "placas" => policy.plates = Some(value.to_uppercase()),
            _ => {}
        }
    }

    for (missing, label) in [
        (policy.number.is_empty(), "poliza"),
        (policy.holder.is_empty(), "titular"),
        (policy.insurer.is_empty(), "aseguradora"),
    ] {
        if missing {
            errors.push(format!("Falta el campo obligatorio: {}", label));
        }
    }

    if errors.is_empty() {
        Ok(policy)
    } else {
        Err(errors)
    }
}

/// `monto` and `fecha`, as `campo: valor` lines or as two bare lines.
pub fn parse_payment(text: &str) -> Result<Payment, String> {
    let fields = field_lines(text);
    let lookup = |name: &str| {
        fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    };

    let (amount, date) = match (lookup("monto"), lookup("fecha")) {
        (Some(amount), Some(date)) => (amount, date),
        _ => {
            let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
            match lines.as_slice() {
                [amount, date] => (amount.to_string(), date.to_string()),
                _ => return Err("Envía el pago como:\nmonto: 1500\nfecha: 15/03/2026".to_string()),
            }
        }
    };

    Ok(Payment {
        amount: parse_amount(&amount)?,
        date: parse_date(&date)?,
    })
}

/// Four lines: cost, date, expediente, origin-destination.
pub fn parse_service(text: &str) -> Result<Service, String> {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let [cost, date, expediente, route] = lines.as_slice() else {
        return Err(
            "Envía el servicio en 4 líneas:\ncosto\nfecha (dd/mm/aaaa)\nexpediente\norigen - destino"
                .to_string(),
        );
    };

    Ok(Service {
        cost: parse_amount(cost)?,
        date: parse_date(date)?,
        expediente: expediente.to_string(),
        route: route.to_string(),
        contact_time: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_block_with_accents() {
        let policy = parse_policy_block(
            "Póliza: abc-123\nTitular: Juan Pérez\nAseguradora: GNP\nTeléfono: 55 1234 5678\nFecha: 01/02/2026",
        )
        .unwrap();

        assert_eq!(policy.number, "ABC-123");
        assert_eq!(policy.holder, "Juan Pérez");
        assert_eq!(policy.phone.as_deref(), Some("5512345678"));
        assert_eq!(policy.issue_date, NaiveDate::from_ymd_opt(2026, 2, 1));
    }

    #[test]
    fn test_policy_block_reports_every_problem() {
        let errors = parse_policy_block("titular: Ana\nfecha: 31/02/2026").unwrap_err();

        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("poliza")));
        assert!(errors.iter().any(|e| e.contains("aseguradora")));
    }

    #[test]
    fn test_policy_numbers_dedupe() {
        assert_eq!(
            parse_policy_numbers("a1, B2\na1").unwrap(),
            vec!["A1".to_string(), "B2".to_string()]
        );
        assert!(parse_policy_numbers("  ").is_err());
        assert!(parse_policy_numbers("A1 $$").is_err());
    }

    #[test]
    fn test_payment_formats() {
        let labelled = parse_payment("monto: $1,500.50\nfecha: 15/03/2026").unwrap();
        let bare = parse_payment("1500.50\n15-03-2026").unwrap();

        assert_eq!(labelled, bare);
        assert_eq!(labelled.amount, 1500.5);
        assert!(parse_payment("monto: -3\nfecha: 15/03/2026").is_err());
        assert!(parse_payment("hola").is_err());
    }

    #[test]
    fn test_service_needs_four_lines() {
        let service = parse_service("850\n01/03/2026\nEXP-77\nCDMX - Puebla").unwrap();
        assert_eq!(service.expediente, "EXP-77");
        assert!(parse_service("850\n01/03/2026").is_err());
    }

    #[test]
    fn test_phone_and_contact_time() {
        assert_eq!(parse_phone("(55) 1234-5678"), Ok("5512345678".to_string()));
        assert!(parse_phone("12345").is_err());
        assert_eq!(
            parse_contact_time("14:30"),
            Ok(NaiveTime::from_hms_opt(14, 30, 0).unwrap())
        );
        assert!(parse_contact_time("25:00").is_err());
    }

    #[test]
    fn test_coordinates_and_distance() {
        let cdmx = parse_coordinates("19.4326, -99.1332").unwrap();
        let puebla = parse_coordinates("19.0414,-98.2063").unwrap();

        let km = cdmx.distance_km(&puebla);
        assert!((100.0..120.0).contains(&km), "got {}", km);
        assert!(parse_coordinates("95,0").is_err());
        assert!(parse_coordinates("19.4").is_err());
    }
}
