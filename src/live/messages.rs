//! # Live Session Messages
//!
//! Typed view of the frames exchanged with the upstream live session.
//!
//! ## Inbound:
//! Each websocket text frame from the upstream is parsed into zero or more
//! [`ServerMessage`]s, in the order their content appears in the frame. A frame
//! carrying model parts and `turnComplete` yields `Content` followed by
//! `TurnComplete`, so the turn loop sees the parts before the end of the turn.
//!
//! ## Outbound:
//! `setup` (once, first), `clientContent` (the user's turn) and `toolResponse`
//! (acknowledgements of function calls).

use crate::models::InlineImage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A structured action request emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub id: String,
}

/// One piece of streamed model output.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Audio { data: String, mime_type: String },
}

/// A message delivered by the upstream session, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ConnectionOpened,
    ToolCallBatch { calls: Vec<FunctionCall> },
    Content { parts: Vec<ContentPart> },
    TurnComplete,
    ConnectionError { reason: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerFrame {
    #[serde(default)]
    setup_complete: Option<Value>,
    #[serde(default)]
    server_content: Option<ServerContentFrame>,
    #[serde(default)]
    tool_call: Option<ToolCallFrame>,
    #[serde(default)]
    tool_call_cancellation: Option<ToolCallCancellationFrame>,
    #[serde(default)]
    go_away: Option<Value>,
    #[serde(default)]
    error: Option<ErrorFrame>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContentFrame {
    #[serde(default)]
    model_turn: Option<ModelTurnFrame>,
    #[serde(default)]
    output_transcription: Option<TranscriptionFrame>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurnFrame {
    #[serde(default)]
    parts: Vec<PartFrame>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartFrame {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineDataFrame>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataFrame {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct TranscriptionFrame {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallFrame {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolCallCancellationFrame {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorFrame {
    #[serde(default)]
    message: String,
}

/// Frame-level notices that do not enter the response queue.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameNotice {
    Interrupted,
    GoAway(Value),
    ToolCallCancelled(Vec<String>),
}

/// Result of parsing one upstream frame.
#[derive(Debug, Default, PartialEq)]
pub struct ParsedFrame {
    pub messages: Vec<ServerMessage>,
    pub notices: Vec<FrameNotice>,
}

pub fn parse_server_frame(text: &str) -> Result<ParsedFrame, serde_json::Error> {
    let frame: ServerFrame = serde_json::from_str(text)?;
    let mut parsed = ParsedFrame::default();

    if frame.setup_complete.is_some() {
        parsed.messages.push(ServerMessage::ConnectionOpened);
    }

    if let Some(error) = frame.error {
        parsed.messages.push(ServerMessage::ConnectionError {
            reason: error.message,
        });
    }

    if let Some(tool_call) = frame.tool_call {
        parsed.messages.push(ServerMessage::ToolCallBatch {
            calls: tool_call.function_calls,
        });
    }

    if let Some(cancellation) = frame.tool_call_cancellation {
        parsed
            .notices
            .push(FrameNotice::ToolCallCancelled(cancellation.ids));
    }

    if let Some(content) = frame.server_content {
        let mut parts = Vec::new();

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if part.thought {
                    continue;
                }
                if let Some(inline) = part.inline_data {
                    parts.push(ContentPart::Audio {
                        data: inline.data,
                        mime_type: inline.mime_type,
                    });
                }
                if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    parts.push(ContentPart::Text(text));
                }
            }
        }

        if let Some(transcription) = content.output_transcription {
            if !transcription.text.is_empty() {
                parts.push(ContentPart::Text(transcription.text));
            }
        }

        if !parts.is_empty() {
            parsed.messages.push(ServerMessage::Content { parts });
        }
        if content.interrupted {
            parsed.notices.push(FrameNotice::Interrupted);
        }
        if content.turn_complete {
            parsed.messages.push(ServerMessage::TurnComplete);
        }
    }

    if let Some(go_away) = frame.go_away {
        parsed.notices.push(FrameNotice::GoAway(go_away));
    }

    Ok(parsed)
}

/// Everything the upstream needs to open a session.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub function_declarations: Vec<Value>,
}

impl SessionSetup {
    pub fn to_frame(&self) -> Value {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        json!({
            "setup": {
                "model": model,
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": self.voice }
                        }
                    }
                },
                "systemInstruction": {
                    "parts": [{ "text": self.system_instruction }]
                },
                "tools": [{ "functionDeclarations": self.function_declarations }],
                "outputAudioTranscription": {}
            }
        })
    }
}

/// The user's side of the turn.
#[derive(Debug, Clone)]
pub struct TurnContent {
    pub text: String,
    pub image: Option<InlineImage>,
}

impl TurnContent {
    pub fn to_frame(&self) -> Value {
        let mut parts = vec![json!({ "text": self.text })];
        if let Some(image) = &self.image {
            parts.push(json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": image.data
                }
            }));
        }

        json!({
            "clientContent": {
                "turns": [{ "role": "user", "parts": parts }],
                "turnComplete": true
            }
        })
    }
}

/// Reply to one function call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl FunctionResponse {
    /// Generic success reply, sent whether or not the browser acts on the call.
    pub fn acknowledged(call: &FunctionCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response: json!({ "result": "success" }),
        }
    }
}

pub fn tool_response_frame(responses: &[FunctionResponse]) -> Value {
    json!({
        "toolResponse": {
            "functionResponses": responses
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_complete_opens() {
        let parsed = parse_server_frame(r#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(parsed.messages, vec![ServerMessage::ConnectionOpened]);
    }

    #[test]
    fn test_content_precedes_turn_complete() {
        let frame = r#"{
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}},
                    {"text": "Halo"},
                    {"text": "thinking...", "thought": true}
                ]},
                "outputTranscription": {"text": " kopi"},
                "turnComplete": true
            }
        }"#;
        let parsed = parse_server_frame(frame).unwrap();

        assert_eq!(
            parsed.messages,
            vec![
                ServerMessage::Content {
                    parts: vec![
                        ContentPart::Audio {
                            data: "AAA=".into(),
                            mime_type: "audio/pcm;rate=24000".into()
                        },
                        ContentPart::Text("Halo".into()),
                        ContentPart::Text(" kopi".into()),
                    ]
                },
                ServerMessage::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_tool_call_batch() {
        let frame = r#"{"toolCall":{"functionCalls":[
            {"id":"c1","name":"show_umkm_details","args":{"umkm_id":"u1"}},
            {"id":"c2","name":"highlight_umkm","args":{"umkm_ids":["u1","u2"]}}
        ]}}"#;
        let parsed = parse_server_frame(frame).unwrap();

        match &parsed.messages[..] {
            [ServerMessage::ToolCallBatch { calls }] => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "c1");
                assert_eq!(calls[1].args["umkm_ids"][1], "u2");
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn test_notices_are_not_messages() {
        let parsed =
            parse_server_frame(r#"{"goAway":{"timeLeft":"10s"},"toolCallCancellation":{"ids":["c1"]}}"#)
                .unwrap();
        assert!(parsed.messages.is_empty());
        assert_eq!(parsed.notices.len(), 2);
    }

    #[test]
    fn test_malformed_frame_is_an_error() {
        assert!(parse_server_frame("not json").is_err());
    }

    #[test]
    fn test_outbound_frames() {
        let setup = SessionSetup {
            model: "gemini-2.0-flash-live-001".into(),
            voice: "Puck".into(),
            system_instruction: "You are a guide".into(),
            function_declarations: vec![json!({"name": "search_umkm"})],
        };
        let frame = setup.to_frame();
        assert_eq!(frame["setup"]["model"], "models/gemini-2.0-flash-live-001");
        assert_eq!(
            frame["setup"]["tools"][0]["functionDeclarations"][0]["name"],
            "search_umkm"
        );

        let content = TurnContent {
            text: "cari kopi".into(),
            image: Some(InlineImage {
                mime_type: "image/png".into(),
                data: "abc".into(),
            }),
        };
        let frame = content.to_frame();
        let parts = &frame["clientContent"]["turns"][0]["parts"];
        assert_eq!(parts[0]["text"], "cari kopi");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");

        let call = FunctionCall {
            name: "show_umkm_details".into(),
            args: json!({"umkm_id": "u1"}),
            id: "c1".into(),
        };
        let frame = tool_response_frame(&[FunctionResponse::acknowledged(&call)]);
        assert_eq!(frame["toolResponse"]["functionResponses"][0]["id"], "c1");
        assert_eq!(
            frame["toolResponse"]["functionResponses"][0]["response"]["result"],
            "success"
        );
    }
}
