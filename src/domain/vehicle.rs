use chrono::{Datelike, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The six fields every registered vehicle needs, in prompt order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleField {
    Serie,
    Marca,
    Submarca,
    Anio,
    Color,
    Placas,
}

impl VehicleField {
    pub const ORDER: [VehicleField; 6] = [
        VehicleField::Serie,
        VehicleField::Marca,
        VehicleField::Submarca,
        VehicleField::Anio,
        VehicleField::Color,
        VehicleField::Placas,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            VehicleField::Serie => "serie",
            VehicleField::Marca => "marca",
            VehicleField::Submarca => "submarca",
            VehicleField::Anio => "anio",
            VehicleField::Color => "color",
            VehicleField::Placas => "placas",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_lowercase();
        Self::ORDER
            .into_iter()
            .find(|field| field.key() == key || (key == "año" && *field == VehicleField::Anio))
    }

    pub fn label(&self) -> &'static str {
        match self {
            VehicleField::Serie => "Serie (VIN)",
            VehicleField::Marca => "Marca",
            VehicleField::Submarca => "Submarca",
            VehicleField::Anio => "Año",
            VehicleField::Color => "Color",
            VehicleField::Placas => "Placas",
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            VehicleField::Serie => "Escribe la serie (VIN) del vehículo (17 caracteres):",
            VehicleField::Marca => "Escribe la marca del vehículo:",
            VehicleField::Submarca => "Escribe la submarca (modelo) del vehículo:",
            VehicleField::Anio => "Escribe el año del vehículo (ej. 2019):",
            VehicleField::Color => "Escribe el color del vehículo:",
            VehicleField::Placas => "Escribe las placas del vehículo:",
        }
    }

    /// Normalize and validate user or OCR input for this field.
    pub fn validate(&self, raw: &str) -> Result<String, String> {
        let value = raw.trim();
        match self {
            VehicleField::Serie => {
                let serie: String = value
                    .chars()
                    .filter(|c| !c.is_whitespace() && *c != '-')
                    .collect::<String>()
                    .to_uppercase();
                if serie.len() == 17 && serie.chars().all(|c| c.is_ascii_alphanumeric()) {
                    Ok(serie)
                } else {
                    Err("La serie debe tener exactamente 17 letras o números.".to_string())
                }
            }
            VehicleField::Marca | VehicleField::Submarca => {
                let len = value.chars().count();
                if (1..=40).contains(&len) {
                    Ok(value.to_string())
                } else {
                    Err(format!("{} debe tener entre 1 y 40 caracteres.", self.label()))
                }
            }
            VehicleField::Anio => {
                let max_year = Local::now().year() + 1;
                match value.parse::<i32>() {
                    Ok(year) if value.len() == 4 && (1950..=max_year).contains(&year) => {
                        Ok(year.to_string())
                    }
                    _ => Err(format!("El año debe ser un número entre 1950 y {}.", max_year)),
                }
            }
            VehicleField::Color => {
                let len = value.chars().count();
                if (1..=30).contains(&len)
                    && value.chars().all(|c| c.is_alphabetic() || c == ' ')
                {
                    Ok(value.to_string())
                } else {
                    Err("El color solo puede contener letras (máximo 30).".to_string())
                }
            }
            VehicleField::Placas => {
                let plates: String = value
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<String>()
                    .to_uppercase();
                let len = plates.len();
                if (5..=10).contains(&len)
                    && plates.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                {
                    Ok(plates)
                } else {
                    Err("Las placas deben tener de 5 a 10 letras, números o guiones.".to_string())
                }
            }
        }
    }
}

impl fmt::Display for VehicleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Vehicle fields collected so far.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleFields {
    pub serie: Option<String>,
    pub marca: Option<String>,
    pub submarca: Option<String>,
    pub anio: Option<String>,
    pub color: Option<String>,
    pub placas: Option<String>,
}

impl VehicleFields {
    pub fn get(&self, field: VehicleField) -> Option<&str> {
        match field {
            VehicleField::Serie => self.serie.as_deref(),
            VehicleField::Marca => self.marca.as_deref(),
            VehicleField::Submarca => self.submarca.as_deref(),
            VehicleField::Anio => self.anio.as_deref(),
            VehicleField::Color => self.color.as_deref(),
            VehicleField::Placas => self.placas.as_deref(),
        }
    }

    pub fn set(&mut self, field: VehicleField, value: String) {
        let slot = match field {
            VehicleField::Serie => &mut self.serie,
            VehicleField::Marca => &mut self.marca,
            VehicleField::Submarca => &mut self.submarca,
            VehicleField::Anio => &mut self.anio,
            VehicleField::Color => &mut self.color,
            VehicleField::Placas => &mut self.placas,
        };
        *slot = Some(value);
    }

    /// Missing fields, always in [`VehicleField::ORDER`].
    pub fn missing(&self) -> Vec<VehicleField> {
        VehicleField::ORDER
            .into_iter()
            .filter(|field| self.get(*field).is_none())
            .collect()
    }

    pub fn to_draft(&self) -> Option<VehicleDraft> {
        Some(VehicleDraft {
            serie: self.serie.clone()?,
            brand: self.marca.clone()?,
            model: self.submarca.clone()?,
            year: self.anio.as_deref()?.parse().ok()?,
            color: self.color.clone()?,
            plates: self.placas.clone()?,
        })
    }

    pub fn summary(&self) -> String {
        VehicleField::ORDER
            .iter()
            .map(|field| format!("• {}: {}", field.label(), self.get(*field).unwrap_or("—")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A complete vehicle ready to be persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VehicleDraft {
    pub serie: String,
    pub brand: String,
    pub model: String,
    pub year: i32,
    pub color: String,
    pub plates: String,
}
