//! Intranet timetable client.
//!
//! The site has no API proper: a form login yields a session cookie, the
//! calendar page carries its bootstrap data in an inline script, and the
//! timetable views are fed by AJAX endpoints returning JSON. Sessions
//! expire server-side at will; any response can come back as the login
//! page, which we detect by marker and answer with one fresh login before
//! retrying the request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::{COOKIE, SET_COOKIE};
use scraper::{Html, Selector};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::UpstreamError;
use crate::types::{
    Lesson, LessonStatus, Metadata, SchoolClass, Semester, TimeSlot, parse_site_datetime,
};

/// Production base URL of the timetable site.
pub const DEFAULT_BASE_URL: &str = "https://intranet.tam.ch";

const USER_AGENT: &str = "ttsync/0.1 (+https://github.com/ttsync/ttsync)";
const SESSION_COOKIE: &str = "sturmsession";
const USER_COOKIE: &str = "sturmuser";
/// Marker the site embeds in the logged-out page.
const LOGGED_OUT_MARKER: &str = "Login.init(null);";
/// Attempts per request, counting re-logins.
const MAX_SESSION_ATTEMPTS: usize = 3;

/// Upstream collaborator port consumed by the dispatcher.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Fetch global metadata (semesters and time grid).
    async fn get_metadata(&self) -> Result<Metadata, UpstreamError>;

    /// Fetch the classes of a semester.
    async fn get_classes(&self, semester_id: &str) -> Result<Vec<SchoolClass>, UpstreamError>;

    /// Fetch the lessons of one class within a date range.
    async fn get_lessons(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        class_id: &str,
    ) -> Result<Vec<Lesson>, UpstreamError>;
}

/// HTTP client for the intranet site.
pub struct IntranetClient {
    http: reqwest::Client,
    base_url: String,
    school: String,
    user: String,
    password: String,
    session: Mutex<Option<String>>,
}

impl IntranetClient {
    /// Create a client against the production site.
    pub fn new(
        school: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, UpstreamError> {
        Self::with_base_url(DEFAULT_BASE_URL, school, user, password)
    }

    /// Create a client against a custom base URL (tests).
    pub fn with_base_url(
        base_url: impl Into<String>,
        school: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            school: school.into(),
            user: user.into(),
            password: password.into(),
            session: Mutex::new(None),
        })
    }

    /// Log in and return a fresh session id.
    async fn login(&self) -> Result<String, UpstreamError> {
        debug!(school = %self.school, user = %self.user, "logging in");
        let response = self
            .http
            .post(format!("{}/", self.base_url))
            .form(&[
                ("loginschool", self.school.as_str()),
                ("loginuser", self.user.as_str()),
                ("loginpassword", self.password.as_str()),
            ])
            .send()
            .await?;

        for raw in response.headers().get_all(SET_COOKIE) {
            if let Ok(text) = raw.to_str() {
                if let Some(session) = cookie_value(text, SESSION_COOKIE) {
                    return Ok(session);
                }
            }
        }
        Err(UpstreamError::MissingSessionCookie)
    }

    /// Send a request with session cookies attached, transparently logging
    /// in again when the site answers with the logged-out page.
    async fn request_text<F>(&self, build: F) -> Result<String, UpstreamError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        for attempt in 0..MAX_SESSION_ATTEMPTS {
            let session = {
                let mut guard = self.session.lock().await;
                match guard.as_ref() {
                    Some(session) => session.clone(),
                    None => {
                        let fresh = self.login().await?;
                        *guard = Some(fresh.clone());
                        fresh
                    }
                }
            };

            let cookies = format!("{SESSION_COOKIE}={session}; {USER_COOKIE}={}", self.user);
            let response = build(&self.http).header(COOKIE, cookies).send().await?;
            let body = response.text().await?;

            if body.contains(LOGGED_OUT_MARKER) {
                debug!(attempt, "session rejected by site, discarding it");
                *self.session.lock().await = None;
                continue;
            }
            return Ok(body);
        }

        warn!("giving up after {MAX_SESSION_ATTEMPTS} session attempts");
        Err(UpstreamError::SessionRejected)
    }

    fn ajax_url(&self, tail: &str) -> String {
        format!("{}/{}/timetable/{tail}", self.base_url, self.school)
    }
}

#[async_trait]
impl UpstreamClient for IntranetClient {
    async fn get_metadata(&self) -> Result<Metadata, UpstreamError> {
        let url = format!("{}/krm/calendar", self.base_url);
        let body = self.request_text(|http| http.get(&url)).await?;

        let code = bootstrap_script(&body)?;
        let raw_periods: Vec<RawPeriod> = parse_assignment(&code, "period")?;
        let time_slots: Vec<TimeSlot> = parse_assignment(&code, "timegrid")?;

        let semesters = raw_periods
            .into_iter()
            .map(|raw| {
                Ok(Semester {
                    id: raw.period_id,
                    name: raw.period,
                    start_date: parse_site_datetime(&raw.start_date)?,
                    end_date: parse_site_datetime(&raw.end_date)?,
                })
            })
            .collect::<Result<Vec<_>, UpstreamError>>()?;

        Ok(Metadata { semesters, time_slots })
    }

    async fn get_classes(&self, semester_id: &str) -> Result<Vec<SchoolClass>, UpstreamError> {
        let url = self.ajax_url(&format!("ajax-get-resources/period/{semester_id}"));
        let empty_form: HashMap<String, String> = HashMap::new();
        let body = self
            .request_text(|http| {
                http.post(&url)
                    .header("X-Requested-With", "XMLHttpRequest")
                    .form(&empty_form)
            })
            .await?;

        let response: ResourcesResponse = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::Parse(format!("resources response: {e}")))?;
        Ok(response
            .data
            .classes
            .into_iter()
            .map(|raw| SchoolClass {
                id: raw.class_id,
                name: raw.class_name,
            })
            .collect())
    }

    async fn get_lessons(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        class_id: &str,
    ) -> Result<Vec<Lesson>, UpstreamError> {
        let url = self.ajax_url("ajax-get-timetable");
        let form = [
            ("startDate", start.timestamp_millis().to_string()),
            ("endDate", end.timestamp_millis().to_string()),
            ("classId[]", class_id.to_string()),
            ("holidaysOnly", "0".to_string()),
        ];
        let body = self
            .request_text(|http| {
                http.post(&url)
                    .header("X-Requested-With", "XMLHttpRequest")
                    .form(&form)
            })
            .await?;

        let response: TimetableResponse = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::Parse(format!("timetable response: {e}")))?;
        response.data.into_iter().map(Lesson::try_from).collect()
    }
}

/// Locate the inline script that boots the calendar administration view.
fn bootstrap_script(html: &str) -> Result<String, UpstreamError> {
    let doc = Html::parse_document(html);
    let scripts = Selector::parse("script")
        .map_err(|e| UpstreamError::Parse(format!("selector: {e}")))?;

    doc.select(&scripts)
        .map(|script| script.text().collect::<String>())
        .find(|code| code.contains("ttAdministration.init();"))
        .ok_or_else(|| UpstreamError::Parse("calendar bootstrap script not found".to_string()))
}

/// Pull one `ttAdministration.<field> = <literal>;` assignment out of the
/// bootstrap script and parse the literal as JSON.
fn parse_assignment<T: serde::de::DeserializeOwned>(
    code: &str,
    field: &str,
) -> Result<T, UpstreamError> {
    let pattern = format!(r"(?s)ttAdministration\.{field}\s*=\s*(.*?[\]}}])\s*;");
    let regex = Regex::new(&pattern)
        .map_err(|e| UpstreamError::Parse(format!("bad field pattern {field:?}: {e}")))?;
    let literal = regex
        .captures(code)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| UpstreamError::Parse(format!("assignment {field:?} not found")))?;
    serde_json::from_str(literal.as_str())
        .map_err(|e| UpstreamError::Parse(format!("assignment {field:?}: {e}")))
}

/// Value of a named cookie within a `Set-Cookie` header, if present.
fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// The site is inconsistent about numeric ids; accept both forms.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPeriod {
    #[serde(deserialize_with = "id_string")]
    period_id: String,
    period: String,
    start_date: String,
    end_date: String,
}

#[derive(Debug, Deserialize)]
struct ResourcesResponse {
    data: ResourcesData,
}

#[derive(Debug, Deserialize)]
struct ResourcesData {
    #[serde(default)]
    classes: Vec<RawClass>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClass {
    #[serde(deserialize_with = "id_string")]
    class_id: String,
    class_name: String,
}

#[derive(Debug, Deserialize)]
struct TimetableResponse {
    #[serde(default)]
    data: Vec<RawLesson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLesson {
    title: String,
    subject_name: String,
    room_name: Option<String>,
    lesson_date: String,
    lesson_start: String,
    lesson_end: String,
    teacher_acronym: Option<String>,
    #[serde(default)]
    timetable_entry_type_short: String,
    message: Option<String>,
}

impl TryFrom<RawLesson> for Lesson {
    type Error = UpstreamError;

    fn try_from(raw: RawLesson) -> Result<Self, Self::Error> {
        Ok(Lesson {
            name: raw.title,
            full_name: raw.subject_name,
            room: raw.room_name,
            start_date: parse_site_datetime(&format!("{} {}", raw.lesson_date, raw.lesson_start))?,
            end_date: parse_site_datetime(&format!("{} {}", raw.lesson_date, raw.lesson_end))?,
            teacher: raw.teacher_acronym,
            status: LessonStatus::from_site_code(&raw.timetable_entry_type_short),
            comment: raw.message,
        })
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
