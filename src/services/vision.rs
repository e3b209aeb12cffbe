//! Structured field extraction from photographed documents.

use super::circuit_breaker::CircuitBreaker;
use crate::config::VisionConfig;
use crate::error::VisionError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use vision_client::{VisionClient, VisionClientConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    /// Tarjeta de circulación
    VehicleCard,
    PolicyDocument,
}

impl DocumentKind {
    /// Keys the model is asked to fill, in the order they are reported.
    pub fn keys(&self) -> &'static [&'static str] {
        match self {
            DocumentKind::VehicleCard => &["serie", "marca", "submarca", "anio", "color", "placas"],
            DocumentKind::PolicyDocument => &["poliza", "aseguradora", "agente", "fecha_emision"],
        }
    }

    fn instruction(&self) -> String {
        let what = match self {
            DocumentKind::VehicleCard => {
                "Esta imagen es una tarjeta de circulación mexicana. \
                 `serie` es el NIV/VIN de 17 caracteres, `submarca` es el modelo o línea, \
                 `anio` es el año modelo con 4 dígitos."
            }
            DocumentKind::PolicyDocument => {
                "Esta imagen es la carátula de una póliza de seguro de auto. \
                 `poliza` es el número de póliza, `fecha_emision` va en formato dd/mm/aaaa."
            }
        };
        format!(
            "{} Responde solo un objeto JSON con las claves {}. \
             Usa null para cualquier dato que no sea legible; no inventes valores.",
            what,
            self.keys().join(", ")
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub fields: HashMap<String, String>,
    /// Keys with a usable value, in [`DocumentKind::keys`] order
    pub fields_found: Vec<String>,
}

#[async_trait]
pub trait VisionService: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn extract_fields(
        &self,
        image: &[u8],
        kind: DocumentKind,
    ) -> Result<ExtractedFields, VisionError>;

    async fn detect_plates(&self, image: &[u8]) -> Result<Vec<String>, VisionError>;
}

/// Keep the requested keys that hold a non-empty string or a number.
fn collect_fields(answer: &Map<String, Value>, keys: &[&str]) -> ExtractedFields {
    let mut extracted = ExtractedFields::default();
    for key in keys {
        let value = match answer.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        extracted.fields.insert(key.to_string(), value);
        extracted.fields_found.push(key.to_string());
    }
    extracted
}

fn collect_plates(answer: &Map<String, Value>) -> Vec<String> {
    match answer.get("placas") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|plate| plate.trim().to_uppercase())
            .filter(|plate| !plate.is_empty())
            .collect(),
        Some(Value::String(plate)) if !plate.trim().is_empty() => vec![plate.trim().to_uppercase()],
        _ => Vec::new(),
    }
}

fn guess_mime(image: &[u8]) -> &'static str {
    image::guess_format(image)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/jpeg")
}

/// Vision over an OpenAI-compatible endpoint, with a timeout per call and
/// a circuit breaker in front.
///
/// Plate reading on vehicle photos is best effort and trips its own
/// breaker, so its misses never block card extraction.
pub struct OpenAiVision {
    client: Option<VisionClient>,
    breaker: CircuitBreaker,
    plate_breaker: CircuitBreaker,
    timeout: Duration,
}

impl OpenAiVision {
    pub fn from_config(config: &VisionConfig) -> Result<Self, VisionError> {
        let timeout = Duration::from_secs(config.timeout_sec);
        let client = match config.api_key.as_deref() {
            Some(key) if config.is_configured() => Some(VisionClient::new(VisionClientConfig {
                api_key: key.to_string(),
                api_base: config.api_base.clone(),
                model: config.model.clone(),
                timeout,
            })?),
            _ => None,
        };

        let breaker = || {
            CircuitBreaker::new(
                config.circuit_breaker_threshold,
                Duration::from_secs(config.circuit_breaker_reset_sec),
            )
        };
        Ok(Self {
            client,
            breaker: breaker(),
            plate_breaker: breaker(),
            timeout,
        })
    }

    async fn ask(
        &self,
        breaker: &CircuitBreaker,
        image: &[u8],
        instruction: &str,
    ) -> Result<Map<String, Value>, VisionError> {
        let client = self.client.as_ref().ok_or(VisionError::NotConfigured)?;

        if breaker.is_open() {
            return Err(VisionError::CircuitOpen);
        }

        let mime = guess_mime(image);
        debug!("Vision call: model={}, mime={}", client.model(), mime);

        let result = match tokio::time::timeout(
            self.timeout,
            client.extract_json(image, mime, instruction),
        )
        .await
        {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(e)) => Err(VisionError::Client(e)),
            Err(_) => Err(VisionError::Timeout),
        };

        match &result {
            Ok(_) => breaker.record_success(),
            Err(e) => {
                warn!("Vision call failed: {}", e);
                breaker.record_failure();
            }
        }
        result
    }
}

#[async_trait]
impl VisionService for OpenAiVision {
    fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    async fn extract_fields(
        &self,
        image: &[u8],
        kind: DocumentKind,
    ) -> Result<ExtractedFields, VisionError> {
        let answer = self.ask(&self.breaker, image, &kind.instruction()).await?;
        Ok(collect_fields(&answer, kind.keys()))
    }

    async fn detect_plates(&self, image: &[u8]) -> Result<Vec<String>, VisionError> {
        let answer = self
            .ask(
                &self.plate_breaker,
                image,
                "Lee las placas de circulación visibles en esta foto de un vehículo. \
                 Responde solo un objeto JSON {\"placas\": [..]} con cada placa como texto; \
                 usa una lista vacía si no se ve ninguna.",
            )
            .await?;
        Ok(collect_plates(&answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_collect_fields_skips_null_and_blank() {
        let answer = object(json!({
            "serie": "3VW1K1AJ5EM123456",
            "marca": "",
            "anio": 2014,
            "color": null,
            "extra": "ignored"
        }));

        let extracted = collect_fields(&answer, DocumentKind::VehicleCard.keys());

        assert_eq!(extracted.fields_found, vec!["serie", "anio"]);
        assert_eq!(extracted.fields["anio"], "2014");
        assert!(!extracted.fields.contains_key("extra"));
    }

    #[test]
    fn test_collect_plates_accepts_list_or_string() {
        assert_eq!(
            collect_plates(&object(json!({"placas": ["abc123", " "]}))),
            vec!["ABC123"]
        );
        assert_eq!(collect_plates(&object(json!({"placas": "xyz-98"}))), vec!["XYZ-98"]);
        assert!(collect_plates(&object(json!({}))).is_empty());
    }

    #[test]
    fn test_guess_mime_falls_back_to_jpeg() {
        let png_header = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(guess_mime(&png_header), "image/png");
        assert_eq!(guess_mime(b"not an image"), "image/jpeg");
    }

    #[tokio::test]
    async fn test_unconfigured_vision_fails_fast() {
        let vision = OpenAiVision::from_config(&VisionConfig::default()).unwrap();

        assert!(!vision.is_configured());
        assert!(matches!(
            vision.extract_fields(b"img", DocumentKind::VehicleCard).await,
            Err(VisionError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_plate_failures_do_not_open_card_circuit() {
        // Nothing listens on the discard port, so every call fails fast
        let vision = OpenAiVision::from_config(&VisionConfig {
            api_key: Some("sk-test".to_string()),
            api_base: "http://127.0.0.1:9/v1".to_string(),
            timeout_sec: 5,
            circuit_breaker_threshold: 1,
            circuit_breaker_reset_sec: 600,
            ..Default::default()
        })
        .unwrap();

        assert!(vision.detect_plates(b"img").await.is_err());
        assert!(matches!(
            vision.detect_plates(b"img").await,
            Err(VisionError::CircuitOpen)
        ));

        let card = vision.extract_fields(b"img", DocumentKind::VehicleCard).await;
        assert!(!matches!(card, Err(VisionError::CircuitOpen)));
    }
}
