//! App-level host functions.

use std::future::Future;

use multimodal_bridge_core::ApiCallError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::client_api::{ApiFactory, ApiOptions, ClientApi, EmptyParams};

pub const CLOSE_APP: &str = "closeApp";
pub const GET_QUESTION_SEGMENT_LIST: &str = "getQuestionSegmentList";

/// Image rotation in degrees; travels as a bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Rotation {
    None,
    Quarter,
    Half,
    ThreeQuarters,
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        match rotation {
            Rotation::None => 0,
            Rotation::Quarter => 90,
            Rotation::Half => 180,
            Rotation::ThreeQuarters => 270,
        }
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Quarter),
            180 => Ok(Rotation::Half),
            270 => Ok(Rotation::ThreeQuarters),
            other => Err(format!("unsupported rotation {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetQuestionSegmentListParams {
    pub image_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotate: Option<Rotation>,
    /// Restricts detection to this region of the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_rect: Option<Rect>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CornerPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedQuestion {
    pub question_image: String,
    pub corner_points: [CornerPoint; 4],
    pub bounding_box: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetQuestionSegmentListResult {
    pub pass: bool,
    pub status: i64,
    pub mid_box_index: i64,
    pub detected_questions: Vec<DetectedQuestion>,
}

#[derive(Clone)]
pub struct BusinessApi {
    close_app: ClientApi<EmptyParams, Value>,
    question_segments: ClientApi<GetQuestionSegmentListParams, GetQuestionSegmentListResult>,
}

impl BusinessApi {
    pub fn new(factory: &ApiFactory) -> Self {
        Self {
            close_app: factory.create_api(CLOSE_APP, ApiOptions::default()),
            question_segments: factory.create_api(GET_QUESTION_SEGMENT_LIST, ApiOptions::default()),
        }
    }

    pub fn close_app(&self) -> impl Future<Output = Result<Value, ApiCallError>> + Send + 'static {
        self.close_app.call_empty()
    }

    /// Splits a photographed page into individual questions.
    pub fn get_question_segment_list(
        &self,
        params: GetQuestionSegmentListParams,
    ) -> impl Future<Output = Result<GetQuestionSegmentListResult, ApiCallError>> + Send + 'static
    {
        self.question_segments.call(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rotation_travels_as_degrees() {
        let params = GetQuestionSegmentListParams {
            image_id: "img".into(),
            rotate: Some(Rotation::Quarter),
            select_rect: None,
        };

        assert_eq!(
            serde_json::to_value(params).unwrap(),
            json!({"imageId": "img", "rotate": 90})
        );
    }

    #[test]
    fn test_unsupported_rotation_is_rejected() {
        let parsed = serde_json::from_value::<Rotation>(json!(45));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_result_parses_host_payload() {
        let point = json!({"x": 0.0, "y": 0.0});
        let payload = json!({
            "pass": true,
            "status": 0,
            "midBoxIndex": 1,
            "detectedQuestions": [{
                "questionImage": "b64",
                "cornerPoints": [point, point, point, point],
                "boundingBox": {
                    "centerX": 5.0, "centerY": 5.0, "width": 10.0, "height": 10.0,
                    "left": 0.0, "top": 0.0, "right": 10.0, "bottom": 10.0
                }
            }]
        });

        let result: GetQuestionSegmentListResult = serde_json::from_value(payload).unwrap();

        assert!(result.pass);
        assert_eq!(result.mid_box_index, 1);
        assert_eq!(result.detected_questions[0].bounding_box.width, 10.0);
    }
}
