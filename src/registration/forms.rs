//! Submitted forms and their validation rules.
//!
//! Every field deserializes with a default so a missing field becomes a
//! "This field is required." error rather than a rejected request.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{NaiveTime, Weekday};
use regex::Regex;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::{OnlineClinicDetail, PracticeDetail};
use crate::media::{ImageFormat, ImageUpload};

/// Key for errors that belong to the form as a whole.
pub const NON_FIELD_ERRORS: &str = "__all__";

pub const REQUIRED: &str = "This field is required.";

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.@+-]+$").expect("valid username regex"));
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("valid email regex"));
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?\d{10,15}$").expect("valid phone regex"));
static PMDC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("valid pmdc regex"));

const MAX_FEE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

// ── Errors ──────────────────────────────────────────────────────────

/// Validation errors keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error against a field.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    /// Record a form-wide error.
    pub fn add_non_field(&mut self, message: impl Into<String>) {
        self.add(NON_FIELD_ERRORS, message);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// `Ok(value)` if no errors were recorded.
    pub fn finish<T>(self, value: T) -> Result<T, FormErrors> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }

    /// Required non-blank text field, trimmed.
    fn required(&mut self, field: &str, value: &str) -> Option<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.add(field, REQUIRED);
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Required text field with a length cap.
    fn required_max(&mut self, field: &str, value: &str, max: usize) -> Option<String> {
        let value = self.required(field, value)?;
        let len = value.chars().count();
        if len > max {
            self.add(
                field,
                format!("Ensure this value has at most {max} characters (it has {len})."),
            );
            return None;
        }
        Some(value)
    }

    fn secret(&mut self, field: &str, value: Option<SecretString>) -> Option<SecretString> {
        match value {
            Some(s) if !s.expose_secret().is_empty() => Some(s),
            _ => {
                self.add(field, REQUIRED);
                None
            }
        }
    }
}

// ── Cleaned values ──────────────────────────────────────────────────

/// Validated account fields shared by patient and doctor registration.
#[derive(Debug)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password: SecretString,
    pub full_name: String,
    pub phone_no: String,
}

/// Validated doctor step 1.
#[derive(Debug)]
pub struct NewDoctor {
    pub account: NewAccount,
    pub pmdc_no: String,
}

// ── Account forms ───────────────────────────────────────────────────

/// Patient registration form.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PatientRegistrationForm {
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password1: Option<SecretString>,
    #[serde(skip_serializing)]
    pub password2: Option<SecretString>,
    pub full_name: String,
    pub phone_no: String,
}

impl PatientRegistrationForm {
    /// Submitted values safe to echo back (no passwords).
    pub fn values(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn validate(self) -> Result<NewAccount, FormErrors> {
        let mut errors = FormErrors::new();
        let account = validate_account(
            &mut errors,
            AccountFields {
                username: &self.username,
                email: &self.email,
                password1: self.password1,
                password2: self.password2,
                full_name: &self.full_name,
                phone_no: &self.phone_no,
            },
        );
        match account {
            Some(account) => errors.finish(account),
            None => Err(errors),
        }
    }
}

/// Doctor registration step 1: account plus license number.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DoctorAccountForm {
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password1: Option<SecretString>,
    #[serde(skip_serializing)]
    pub password2: Option<SecretString>,
    pub full_name: String,
    pub phone_no: String,
    pub pmdc_no: String,
}

impl DoctorAccountForm {
    pub fn values(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn validate(self) -> Result<NewDoctor, FormErrors> {
        let mut errors = FormErrors::new();
        let pmdc_no = errors.required_max("pmdc_no", &self.pmdc_no, 20).and_then(|p| {
            if PMDC_RE.is_match(&p) {
                Some(p)
            } else {
                errors.add("pmdc_no", "Enter a valid PMDC number (letters, digits and '-').");
                None
            }
        });
        let account = validate_account(
            &mut errors,
            AccountFields {
                username: &self.username,
                email: &self.email,
                password1: self.password1,
                password2: self.password2,
                full_name: &self.full_name,
                phone_no: &self.phone_no,
            },
        );
        match (account, pmdc_no) {
            (Some(account), Some(pmdc_no)) => errors.finish(NewDoctor { account, pmdc_no }),
            _ => Err(errors),
        }
    }
}

struct AccountFields<'a> {
    username: &'a str,
    email: &'a str,
    password1: Option<SecretString>,
    password2: Option<SecretString>,
    full_name: &'a str,
    phone_no: &'a str,
}

fn validate_account(errors: &mut FormErrors, fields: AccountFields<'_>) -> Option<NewAccount> {
    let username = errors.required_max("username", fields.username, 150).and_then(|u| {
        if USERNAME_RE.is_match(&u) {
            Some(u)
        } else {
            errors.add(
                "username",
                "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
            );
            None
        }
    });

    let email = errors.required("email", fields.email).and_then(|e| {
        if EMAIL_RE.is_match(&e) {
            Some(e)
        } else {
            errors.add("email", "Enter a valid email address.");
            None
        }
    });

    let password1 = errors.secret("password1", fields.password1);
    let password2 = errors.secret("password2", fields.password2);
    let password = match (password1, password2) {
        (Some(p1), Some(p2)) => {
            if p1.expose_secret() != p2.expose_secret() {
                errors.add("password2", "The two password fields didn't match.");
                None
            } else {
                let problems = password_problems(p1.expose_secret(), fields.username.trim());
                let ok = problems.is_empty();
                for problem in problems {
                    errors.add("password2", problem);
                }
                ok.then_some(p1)
            }
        }
        _ => None,
    };

    let full_name = errors.required_max("full_name", fields.full_name, 100);
    let phone_no = errors.required("phone_no", fields.phone_no).and_then(|p| {
        let normalized = normalize_phone(&p);
        if PHONE_RE.is_match(&normalized) {
            Some(normalized)
        } else {
            errors.add("phone_no", "Enter a valid phone number (10 to 15 digits).");
            None
        }
    });

    Some(NewAccount {
        username: username?,
        email: email?,
        password: password?,
        full_name: full_name?,
        phone_no: phone_no?,
    })
}

fn password_problems(password: &str, username: &str) -> Vec<&'static str> {
    let mut problems = Vec::new();
    if password.chars().count() < 8 {
        problems.push("This password is too short. It must contain at least 8 characters.");
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        problems.push("This password is entirely numeric.");
    }
    if !username.is_empty() && password.eq_ignore_ascii_case(username) {
        problems.push("The password is too similar to the username.");
    }
    problems
}

/// Strip spaces and dashes from a phone number.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| !matches!(c, ' ' | '-')).collect()
}

// ── Step 2 ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SpecializationsForm {
    /// One specialization per line.
    pub specializations: String,
}

impl SpecializationsForm {
    pub fn values(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn validate(self) -> Result<Vec<String>, FormErrors> {
        let mut errors = FormErrors::new();
        let names = split_specializations(&self.specializations);
        if names.is_empty() {
            errors.add("specializations", REQUIRED);
        }
        for name in &names {
            if name.chars().count() > 100 {
                errors.add(
                    "specializations",
                    format!("Specialization \"{name}\" is longer than 100 characters."),
                );
            }
        }
        errors.finish(names)
    }
}

/// Split multi-line input into trimmed, non-empty lines, in order.
pub fn split_specializations(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Step 3 ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PracticeDetailsForm {
    pub hospital_name: String,
    pub address: String,
    pub city: String,
    pub consultation_fee: String,
    pub years_of_experience: String,
}

impl PracticeDetailsForm {
    pub fn values(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn validate(self, doctor_id: Uuid) -> Result<PracticeDetail, FormErrors> {
        let mut errors = FormErrors::new();
        let hospital_name = errors.required_max("hospital_name", &self.hospital_name, 200);
        let address = errors.required_max("address", &self.address, 255);
        let city = errors.required_max("city", &self.city, 100);
        let fee = parse_fee(&mut errors, &self.consultation_fee);
        let years = errors
            .required("years_of_experience", &self.years_of_experience)
            .and_then(|y| match y.parse::<u32>() {
                Ok(n) if n <= 70 => Some(n),
                Ok(_) => {
                    errors.add(
                        "years_of_experience",
                        "Ensure this value is less than or equal to 70.",
                    );
                    None
                }
                Err(_) => {
                    errors.add("years_of_experience", "Enter a whole number.");
                    None
                }
            });

        match (hospital_name, address, city, fee, years) {
            (Some(hospital_name), Some(address), Some(city), Some(fee), Some(years)) => {
                errors.finish(PracticeDetail {
                    doctor_id,
                    hospital_name,
                    address,
                    city,
                    consultation_fee: fee,
                    years_of_experience: years,
                })
            }
            _ => Err(errors),
        }
    }
}

fn parse_fee(errors: &mut FormErrors, raw: &str) -> Option<Decimal> {
    let raw = errors.required("consultation_fee", raw)?;
    let fee = match Decimal::from_str(&raw) {
        Ok(fee) => fee,
        Err(_) => {
            errors.add("consultation_fee", "Enter a number.");
            return None;
        }
    };
    if fee.is_sign_negative() {
        errors.add("consultation_fee", "Ensure this value is greater than or equal to 0.");
        return None;
    }
    if fee > MAX_FEE {
        errors.add("consultation_fee", "Ensure this value is less than or equal to 1000000.");
        return None;
    }
    if fee.scale() > 2 && fee.normalize().scale() > 2 {
        errors.add(
            "consultation_fee",
            "Ensure that there are no more than 2 decimal places.",
        );
        return None;
    }
    Some(fee.round_dp(2))
}

// ── Step 4 ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OnlineClinicForm {
    pub consultation_fee: String,
    /// Comma- or space-separated weekday names, e.g. `"Mon,Wed,Fri"`.
    pub available_days: String,
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: String,
    pub slot_minutes: String,
}

impl OnlineClinicForm {
    pub fn values(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn validate(self, doctor_id: Uuid) -> Result<OnlineClinicDetail, FormErrors> {
        let mut errors = FormErrors::new();
        let fee = parse_fee(&mut errors, &self.consultation_fee);

        let days = errors
            .required("available_days", &self.available_days)
            .and_then(|raw| match parse_days(&raw) {
                Ok(days) if days.is_empty() => {
                    errors.add("available_days", REQUIRED);
                    None
                }
                Ok(days) => Some(days),
                Err(bad) => {
                    errors.add("available_days", format!("\"{bad}\" is not a day of the week."));
                    None
                }
            });

        let start = parse_time(&mut errors, "start_time", &self.start_time);
        let end = parse_time(&mut errors, "end_time", &self.end_time);

        let slot = errors
            .required("slot_minutes", &self.slot_minutes)
            .and_then(|s| match s.parse::<u32>() {
                Ok(n) if (5..=240).contains(&n) => Some(n),
                _ => {
                    errors.add("slot_minutes", "Enter a whole number between 5 and 240.");
                    None
                }
            });

        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                errors.add("end_time", "End time must be after start time.");
            } else if let Some(slot) = slot {
                if (end - start).num_minutes() < i64::from(slot) {
                    errors.add_non_field("The clinic window is shorter than one slot.");
                }
            }
        }

        match (fee, days, start, end, slot) {
            (Some(fee), Some(days), Some(start), Some(end), Some(slot)) => {
                errors.finish(OnlineClinicDetail {
                    doctor_id,
                    consultation_fee: fee,
                    available_days: days,
                    start_time: start,
                    end_time: end,
                    slot_minutes: slot,
                })
            }
            _ => Err(errors),
        }
    }
}

/// Parse weekday names, de-duplicated and ordered Monday first.
///
/// Returns the first unrecognized token on failure.
pub fn parse_days(raw: &str) -> Result<Vec<Weekday>, String> {
    let mut days = Vec::new();
    for token in raw.split(|c: char| c == ',' || c.is_whitespace()) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let day = Weekday::from_str(token).map_err(|_| token.to_string())?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    days.sort_by_key(|d| d.num_days_from_monday());
    Ok(days)
}

fn parse_time(errors: &mut FormErrors, field: &str, raw: &str) -> Option<NaiveTime> {
    let raw = errors.required(field, raw)?;
    match NaiveTime::parse_from_str(&raw, "%H:%M") {
        Ok(t) => Some(t),
        Err(_) => {
            errors.add(field, "Enter a valid time (HH:MM).");
            None
        }
    }
}

// ── Step 5 ──────────────────────────────────────────────────────────

/// A file part received from a multipart body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct ProfilePictureForm {
    pub profile_picture: Option<UploadedFile>,
    /// Set when the upload was cut off for exceeding the size limit.
    pub too_large: bool,
}

impl ProfilePictureForm {
    /// Only the file name is echoed back.
    pub fn values(&self) -> serde_json::Value {
        let name = self
            .profile_picture
            .as_ref()
            .and_then(|f| f.file_name.clone());
        serde_json::json!({ "profile_picture": name })
    }

    pub fn validate(self, max_bytes: usize) -> Result<ImageUpload, FormErrors> {
        let mut errors = FormErrors::new();
        let too_large = self.too_large;
        let file = self.profile_picture.filter(|f| !f.bytes.is_empty());
        let file = match file {
            Some(file) if !too_large && file.bytes.len() <= max_bytes => file,
            None if !too_large => {
                errors.add("profile_picture", REQUIRED);
                return Err(errors);
            }
            _ => {
                errors.add(
                    "profile_picture",
                    format!("The file is too large. The maximum size is {max_bytes} bytes."),
                );
                return Err(errors);
            }
        };

        let sniffed = ImageFormat::sniff(&file.bytes);
        let declared = file.content_type.as_deref().map(ImageFormat::from_mime);
        let format = match (sniffed, declared) {
            // Declared type must agree with the bytes when it names an image.
            (Some(actual), Some(Some(claimed))) if actual != claimed => None,
            (Some(actual), _) => Some(actual),
            (None, _) => None,
        };

        match format {
            Some(format) => Ok(ImageUpload {
                format,
                bytes: file.bytes,
            }),
            None => {
                errors.add(
                    "profile_picture",
                    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.",
                );
                Err(errors)
            }
        }
    }
}
