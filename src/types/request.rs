//! Generation requests and their canonical form.
//!
//! Callers build a [`GenerationRequest`] with typed, per-kind options.
//! [`GenerationRequest::normalize`] validates it and flattens the options into the sorted parameter
//! list of a [`CanonicalRequest`], which is the only thing the cache key is derived from.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What a request asks the provider to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Text,
    ImageGen,
    AudioGen,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Text => "text",
            RequestKind::ImageGen => "image_gen",
            RequestKind::AudioGen => "audio_gen",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parameter value in canonical primitive form.
///
/// Floats are stored finite with `-0.0` folded into `0.0`, so bitwise equality is value equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl ParamValue {
    /// Canonical float, or `None` for NaN and infinities.
    pub fn float(v: f64) -> Option<Self> {
        if !v.is_finite() {
            return None;
        }
        Some(ParamValue::Float(if v == 0.0 { 0.0 } else { v }))
    }

    pub(crate) fn tag(&self) -> u8 {
        match self {
            ParamValue::Bool(_) => 0x01,
            ParamValue::Int(_) => 0x02,
            ParamValue::Float(_) => 0x03,
            ParamValue::Text(_) => 0x04,
            ParamValue::List(_) => 0x05,
        }
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamValue::Bool(a), ParamValue::Bool(b)) => a == b,
            (ParamValue::Int(a), ParamValue::Int(b)) => a == b,
            (ParamValue::Float(a), ParamValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ParamValue::Text(a), ParamValue::Text(b)) => a == b,
            (ParamValue::List(a), ParamValue::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ParamValue {}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(s) => write!(f, "{:?}", s),
            ParamValue::List(items) => write!(f, "{:?}", items),
        }
    }
}

/// Options for text generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub seed: Option<u64>,
    pub stop: Vec<String>,
    pub system: Option<String>,
    /// Name of the structured output schema the response must follow.
    pub response_format: Option<String>,
}

impl TextOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_temperature(mut self, t: f64) -> Self {
        self.temperature = Some(t);
        self
    }
    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }
    pub fn with_top_p(mut self, p: f64) -> Self {
        self.top_p = Some(p);
        self
    }
    pub fn with_top_k(mut self, k: u32) -> Self {
        self.top_k = Some(k);
        self
    }
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn with_stop(mut self, stop: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
    pub fn with_response_format(mut self, name: impl Into<String>) -> Self {
        self.response_format = Some(name.into());
        self
    }
}

/// Options for image generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOptions {
    /// `WIDTHxHEIGHT`, e.g. `1024x1024`.
    pub size: Option<String>,
    pub quality: Option<String>,
    pub style: Option<String>,
    pub count: Option<u32>,
}

impl ImageOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }
    pub fn with_quality(mut self, q: impl Into<String>) -> Self {
        self.quality = Some(q.into());
        self
    }
    pub fn with_style(mut self, s: impl Into<String>) -> Self {
        self.style = Some(s.into());
        self
    }
    pub fn with_count(mut self, n: u32) -> Self {
        self.count = Some(n);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
    Opus,
    Flac,
    Aac,
    Pcm,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Opus => "opus",
            AudioFormat::Flac => "flac",
            AudioFormat::Aac => "aac",
            AudioFormat::Pcm => "pcm",
        }
    }
}

/// Options for speech/audio generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioOptions {
    pub voice: Option<String>,
    pub format: Option<AudioFormat>,
    pub speed: Option<f64>,
}

impl AudioOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = Some(format);
        self
    }
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }
}

/// Closed set of per-kind options. The variant decides the [`RequestKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationOptions {
    Text(TextOptions),
    ImageGen(ImageOptions),
    AudioGen(AudioOptions),
}

impl GenerationOptions {
    pub fn kind(&self) -> RequestKind {
        match self {
            GenerationOptions::Text(_) => RequestKind::Text,
            GenerationOptions::ImageGen(_) => RequestKind::ImageGen,
            GenerationOptions::AudioGen(_) => RequestKind::AudioGen,
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        GenerationOptions::Text(TextOptions::default())
    }
}

/// A caller-supplied request, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model_id: String,
    pub payload: String,
    #[serde(default)]
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(
        model_id: impl Into<String>,
        payload: impl Into<String>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            payload: payload.into(),
            options,
        }
    }

    pub fn text(model_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(model_id, payload, GenerationOptions::Text(TextOptions::default()))
    }

    pub fn image(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(model_id, prompt, GenerationOptions::ImageGen(ImageOptions::default()))
    }

    pub fn audio(model_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self::new(model_id, input, GenerationOptions::AudioGen(AudioOptions::default()))
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate and canonicalize.
    pub fn normalize(&self) -> Result<CanonicalRequest> {
        let model_id = self.model_id.trim();
        if model_id.is_empty() {
            return Err(invalid("model_id", "model id must not be empty", None));
        }
        let payload = self.payload.trim();
        if payload.is_empty() {
            return Err(invalid("payload", "payload must not be empty", None));
        }

        let mut params = BTreeMap::new();
        match &self.options {
            GenerationOptions::Text(o) => flatten_text(o, &mut params)?,
            GenerationOptions::ImageGen(o) => flatten_image(o, &mut params)?,
            GenerationOptions::AudioGen(o) => flatten_audio(o, &mut params)?,
        }

        Ok(CanonicalRequest {
            model_id: model_id.to_string(),
            kind: self.options.kind(),
            ordered_params: params.into_iter().collect(),
            payload: payload.to_string(),
        })
    }
}

impl TryFrom<GenerationRequest> for CanonicalRequest {
    type Error = Error;

    fn try_from(req: GenerationRequest) -> Result<Self> {
        req.normalize()
    }
}

/// Normalized, immutable request: the unit of caching and dispatch.
///
/// Only constructible through [`GenerationRequest::normalize`], so every instance has trimmed
/// fields and params sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CanonicalRequest {
    model_id: String,
    kind: RequestKind,
    ordered_params: Vec<(String, ParamValue)>,
    payload: String,
}

impl CanonicalRequest {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn params(&self) -> &[(String, ParamValue)] {
        &self.ordered_params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.ordered_params
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
            .map(|i| &self.ordered_params[i].1)
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// First `max_chars` characters of the payload, with `...` when truncated.
    pub fn preview(&self, max_chars: usize) -> String {
        preview(&self.payload, max_chars)
    }
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

impl std::hash::Hash for ParamValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
        match self {
            ParamValue::Bool(b) => b.hash(state),
            ParamValue::Int(i) => i.hash(state),
            ParamValue::Float(v) => v.to_bits().hash(state),
            ParamValue::Text(s) => s.hash(state),
            ParamValue::List(items) => items.hash(state),
        }
    }
}

fn invalid(field: &str, msg: &str, details: Option<String>) -> Error {
    let mut ctx = ErrorContext::new()
        .with_field_path(field)
        .with_source("normalize");
    if let Some(d) = details {
        ctx = ctx.with_details(d);
    }
    Error::validation_with_context(msg, ctx)
}

fn put_float(
    params: &mut BTreeMap<String, ParamValue>,
    name: &str,
    value: Option<f64>,
    range: (f64, f64),
) -> Result<()> {
    let Some(v) = value else {
        return Ok(());
    };
    let field = format!("options.{}", name);
    let canonical = ParamValue::float(v)
        .ok_or_else(|| invalid(&field, "value must be a finite number", Some(v.to_string())))?;
    if v < range.0 || v > range.1 {
        return Err(invalid(
            &field,
            "value out of range",
            Some(format!("expected {}..={}, got {}", range.0, range.1, v)),
        ));
    }
    params.insert(name.to_string(), canonical);
    Ok(())
}

fn put_positive(
    params: &mut BTreeMap<String, ParamValue>,
    name: &str,
    value: Option<u64>,
) -> Result<()> {
    let Some(v) = value else {
        return Ok(());
    };
    if v == 0 {
        return Err(invalid(
            &format!("options.{}", name),
            "value must be at least 1",
            None,
        ));
    }
    params.insert(name.to_string(), ParamValue::Int(v as i64));
    Ok(())
}

fn put_text(
    params: &mut BTreeMap<String, ParamValue>,
    name: &str,
    value: Option<&str>,
) -> Result<()> {
    let Some(v) = value else {
        return Ok(());
    };
    let v = v.trim();
    if v.is_empty() {
        return Err(invalid(
            &format!("options.{}", name),
            "value must not be blank",
            None,
        ));
    }
    params.insert(name.to_string(), ParamValue::Text(v.to_string()));
    Ok(())
}

fn flatten_text(o: &TextOptions, params: &mut BTreeMap<String, ParamValue>) -> Result<()> {
    put_float(params, "temperature", o.temperature, (0.0, 2.0))?;
    put_float(params, "top_p", o.top_p, (0.0, 1.0))?;
    put_positive(params, "max_tokens", o.max_tokens.map(u64::from))?;
    put_positive(params, "top_k", o.top_k.map(u64::from))?;
    if let Some(seed) = o.seed {
        let seed = i64::try_from(seed).map_err(|_| {
            invalid(
                "options.seed",
                "seed must fit in a signed 64-bit integer",
                None,
            )
        })?;
        params.insert("seed".to_string(), ParamValue::Int(seed));
    }
    let mut stop: Vec<String> = o
        .stop
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    stop.sort();
    stop.dedup();
    if !stop.is_empty() {
        params.insert("stop".to_string(), ParamValue::List(stop));
    }
    put_text(params, "system", o.system.as_deref())?;
    put_text(params, "response_format", o.response_format.as_deref())?;
    Ok(())
}

/// Parse `WIDTHxHEIGHT` (either case of `x`) into two positive dimensions.
fn parse_size(raw: &str) -> Option<(u32, u32)> {
    let lowered = raw.trim().to_ascii_lowercase();
    let (w, h) = lowered.split_once('x')?;
    let dim = |d: &str| {
        if d.is_empty() || !d.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        d.parse::<u32>().ok().filter(|n| *n > 0)
    };
    Some((dim(w)?, dim(h)?))
}

fn flatten_image(o: &ImageOptions, params: &mut BTreeMap<String, ParamValue>) -> Result<()> {
    if let Some(size) = o.size.as_deref() {
        let (width, height) = parse_size(size).ok_or_else(|| {
            invalid(
                "options.size",
                "size must be WIDTHxHEIGHT",
                Some(size.trim().to_string()),
            )
        })?;
        params.insert(
            "size".to_string(),
            ParamValue::Text(format!("{}x{}", width, height)),
        );
    }
    put_text(params, "quality", o.quality.as_deref())?;
    put_text(params, "style", o.style.as_deref())?;
    match o.count {
        None | Some(1) => {}
        Some(n) if (2..=10).contains(&n) => {
            params.insert("count".to_string(), ParamValue::Int(i64::from(n)));
        }
        Some(n) => {
            return Err(invalid(
                "options.count",
                "value out of range",
                Some(format!("expected 1..=10, got {}", n)),
            ));
        }
    }
    Ok(())
}

fn flatten_audio(o: &AudioOptions, params: &mut BTreeMap<String, ParamValue>) -> Result<()> {
    put_text(params, "voice", o.voice.as_deref())?;
    if let Some(format) = o.format {
        params.insert(
            "format".to_string(),
            ParamValue::Text(format.as_str().to_string()),
        );
    }
    put_float(params, "speed", o.speed, (0.25, 4.0))?;
    // 1.0 is the provider-neutral default speed
    if params.get("speed") == Some(&ParamValue::Float(1.0)) {
        params.remove("speed");
    }
    Ok(())
}
