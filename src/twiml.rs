//! TwiML response rendering
//!
//! Turns a routing decision into the markup document the provider executes.
//! Rendering never fails outward: the provider treats malformed markup as a
//! hard call failure, so any error degrades to an empty `<Response>`.

use crate::dialog::{NextAction, ProgressMarker};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use thiserror::Error;

/// Minimal valid document returned when rendering fails
pub const EMPTY_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#;

/// Path of the speech-result webhook the provider calls after `<Gather>`
pub const RESPONSE_ROUTE: &str = "/api/twilio/voice/response";

const HANGUP_PAUSE_SECS: &str = "1";

/// Something to speak to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// Text read out by the provider's own voice
    Say(String),
    /// URL of pre-synthesized audio
    Play(String),
}

impl Prompt {
    pub fn say(text: impl Into<String>) -> Self {
        Prompt::Say(text.into())
    }
}

#[derive(Debug, Error)]
#[error("TwiML rendering failed: {0}")]
pub struct RenderError(String);

impl RenderError {
    fn from_display(e: impl std::fmt::Display) -> Self {
        Self(e.to_string())
    }
}

/// Renders decisions as TwiML documents
#[derive(Debug, Clone)]
pub struct Renderer {
    base_url: String,
    voice: String,
    language: String,
}

impl Renderer {
    pub fn new(
        base_url: impl Into<String>,
        voice: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            voice: voice.into(),
            language: language.into(),
        }
    }

    /// Absolute URL for a path on this service
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Callback the provider hits with the next speech result
    pub fn gather_action(&self, marker: ProgressMarker) -> String {
        format!("{}?step={marker}", self.url(RESPONSE_ROUTE))
    }

    /// Speak every prompt in order, then apply `action`.
    pub fn render(&self, prompts: &[Prompt], action: &NextAction) -> String {
        self.try_render(prompts, action).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Falling back to empty TwiML response");
            EMPTY_RESPONSE.to_string()
        })
    }

    /// Speak every prompt, then bridge the caller to `number`.
    pub fn render_transfer(
        &self,
        prompts: &[Prompt],
        number: &str,
        caller_id: Option<&str>,
    ) -> String {
        self.try_render_transfer(prompts, number, caller_id)
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Falling back to empty TwiML response");
                EMPTY_RESPONSE.to_string()
            })
    }

    /// Speak every prompt, then ring the browser client registered as
    /// `identity`.
    pub fn render_client_dial(
        &self,
        prompts: &[Prompt],
        dial_attrs: &[(&str, &str)],
        identity: &str,
        client_attrs: &[(&str, &str)],
    ) -> String {
        self.try_render_client_dial(prompts, dial_attrs, identity, client_attrs)
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Falling back to empty TwiML response");
                EMPTY_RESPONSE.to_string()
            })
    }

    fn try_render(&self, prompts: &[Prompt], action: &NextAction) -> Result<String, RenderError> {
        let mut doc = Document::begin()?;
        self.write_prompts(&mut doc, prompts)?;

        match action {
            NextAction::Continue(marker) => {
                let action_url = self.gather_action(*marker);
                let timeout = marker.listen_timeout_secs().to_string();
                doc.empty(
                    "Gather",
                    &[
                        ("input", "speech"),
                        ("language", self.language.as_str()),
                        ("speechTimeout", "auto"),
                        ("action", action_url.as_str()),
                        ("method", "POST"),
                        ("timeout", timeout.as_str()),
                    ],
                )?;
            }
            NextAction::Redirect(target) => {
                let target_url = if target.starts_with('/') {
                    self.url(target)
                } else {
                    target.clone()
                };
                doc.element("Redirect", &[("method", "POST")], &target_url)?;
            }
            NextAction::Hangup => {
                doc.empty("Pause", &[("length", HANGUP_PAUSE_SECS)])?;
                doc.empty("Hangup", &[])?;
            }
        }

        doc.finish()
    }

    fn try_render_transfer(
        &self,
        prompts: &[Prompt],
        number: &str,
        caller_id: Option<&str>,
    ) -> Result<String, RenderError> {
        let mut doc = Document::begin()?;
        self.write_prompts(&mut doc, prompts)?;

        let mut attrs = vec![("record", "record-from-answer")];
        if let Some(caller_id) = caller_id {
            attrs.push(("callerId", caller_id));
        }
        doc.element("Dial", &attrs, number)?;

        doc.finish()
    }

    fn try_render_client_dial(
        &self,
        prompts: &[Prompt],
        dial_attrs: &[(&str, &str)],
        identity: &str,
        client_attrs: &[(&str, &str)],
    ) -> Result<String, RenderError> {
        let mut doc = Document::begin()?;
        self.write_prompts(&mut doc, prompts)?;

        doc.open("Dial", dial_attrs)?;
        doc.element("Client", client_attrs, identity)?;
        doc.close("Dial")?;

        doc.finish()
    }

    fn write_prompts(&self, doc: &mut Document, prompts: &[Prompt]) -> Result<(), RenderError> {
        for prompt in prompts {
            match prompt {
                Prompt::Say(text) => doc.element(
                    "Say",
                    &[
                        ("voice", self.voice.as_str()),
                        ("language", self.language.as_str()),
                    ],
                    text,
                )?,
                Prompt::Play(url) => doc.element("Play", &[], url)?,
            }
        }
        Ok(())
    }
}

/// A `<Response>` document under construction
struct Document {
    writer: Writer<Vec<u8>>,
}

impl Document {
    fn begin() -> Result<Self, RenderError> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(RenderError::from_display)?;
        writer
            .write_event(Event::Start(BytesStart::new("Response")))
            .map_err(RenderError::from_display)?;
        Ok(Self { writer })
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), RenderError> {
        let mut start = BytesStart::new(name);
        start.extend_attributes(attrs.iter().copied());
        self.writer
            .write_event(Event::Start(start))
            .map_err(RenderError::from_display)
    }

    fn close(&mut self, name: &str) -> Result<(), RenderError> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(RenderError::from_display)
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), RenderError> {
        let mut start = BytesStart::new(name);
        start.extend_attributes(attrs.iter().copied());
        self.writer
            .write_event(Event::Empty(start))
            .map_err(RenderError::from_display)
    }

    fn element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<(), RenderError> {
        self.open(name, attrs)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(RenderError::from_display)?;
        self.close(name)
    }

    fn finish(mut self) -> Result<String, RenderError> {
        self.writer
            .write_event(Event::End(BytesEnd::new("Response")))
            .map_err(RenderError::from_display)?;
        String::from_utf8(self.writer.into_inner()).map_err(RenderError::from_display)
    }
}
