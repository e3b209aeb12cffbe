//! JSON column payloads of policies and vehicles.

use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// An object stored in object storage and attached to a policy or vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub url: String,
    pub storage_key: String,
    pub original_name: String,
    pub size: u64,
    pub content_type: String,
    pub uploaded_at: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub amount: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub cost: f64,
    pub date: NaiveDate,
    pub expediente: String,
    pub route: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_time: Option<NaiveTime>,
}

macro_rules! json_list {
    ($name:ident, $item:ty) => {
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromJsonQueryResult)]
        #[serde(transparent)]
        pub struct $name(pub Vec<$item>);

        impl Deref for $name {
            type Target = Vec<$item>;
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<Vec<$item>> for $name {
            fn from(items: Vec<$item>) -> Self {
                $name(items)
            }
        }
    };
}

json_list!(Attachments, UploadedFile);
json_list!(Payments, Payment);
json_list!(Services, Service);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uploaded_file_uses_camel_case_keys() {
        let file = UploadedFile {
            url: "http://files/a.jpg".to_string(),
            storage_key: "vehiculos/1/a.jpg".to_string(),
            original_name: "a.jpg".to_string(),
            size: 10,
            content_type: "image/jpeg".to_string(),
            uploaded_at: Local::now(),
        };

        let json = serde_json::to_value(&file).unwrap();

        assert_eq!(json["storageKey"], "vehiculos/1/a.jpg");
        assert_eq!(json["originalName"], "a.jpg");
        assert_eq!(json["contentType"], "image/jpeg");
    }

    #[test]
    fn test_service_contact_time_is_optional() {
        let service: Service = serde_json::from_str(
            r#"{"cost": 850.0, "date": "2026-03-01", "expediente": "EXP-1", "route": "A - B"}"#,
        )
        .unwrap();

        assert_eq!(service.contact_time, None);
        assert_eq!(Services::from(vec![service]).len(), 1);
    }
}
