//! Integration tests for the registration HTTP surface.
//!
//! Each test spins up the real Axum router on a random port with an
//! in-memory database and a temporary media root, then drives it over HTTP
//! with redirects disabled so every 303 can be inspected.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::timeout;

use carebook::app::{build_router, AppState};
use carebook::config::AppConfig;
use carebook::media::MediaStore;
use carebook::store::{Database, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
/// Generous because password hashing is deliberately slow.
const TEST_TIMEOUT: Duration = Duration::from_secs(60);

const PNG: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R',
];

struct TestServer {
    base: String,
    db: Arc<dyn Database>,
    client: Client,
    media_dir: TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str, cookie: Option<&str>) -> Response {
        let mut request = self.client.get(self.url(path));
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        request.send().await.unwrap()
    }

    async fn post_form(&self, path: &str, fields: &[(&str, &str)], cookie: Option<&str>) -> Response {
        let mut request = self.client.post(self.url(path)).form(fields);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        request.send().await.unwrap()
    }
}

/// Start the app on a random port.
async fn start_server() -> TestServer {
    let media_dir = TempDir::new().unwrap();
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let media = Arc::new(MediaStore::new(media_dir.path().to_path_buf()));
    media.ensure_dirs().await.unwrap();

    let config = AppConfig {
        media_root: media_dir.path().to_path_buf(),
        max_upload_bytes: 64 * 1024,
        ..AppConfig::default()
    };
    let app = build_router(AppState::new(db.clone(), media, config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        db,
        client,
        media_dir,
    }
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(LOCATION)
        .expect("missing Location header")
        .to_str()
        .unwrap()
}

/// `name=value` pair from the session Set-Cookie header.
fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("session_id="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

fn doctor_account(username: &str) -> Vec<(&'static str, String)> {
    vec![
        ("username", username.to_string()),
        ("email", format!("{username}@example.com")),
        ("password1", "s3cure-pass".to_string()),
        ("password2", "s3cure-pass".to_string()),
        ("full_name", "Dr. Ayesha Malik".to_string()),
        ("phone_no", "0300 1234567".to_string()),
        ("pmdc_no", "12345-P".to_string()),
    ]
}

fn borrowed<'a>(fields: &'a [(&'static str, String)]) -> Vec<(&'static str, &'a str)> {
    fields.iter().map(|(k, v)| (*k, v.as_str())).collect()
}

/// Run step 1 and return the session cookie.
async fn register_doctor(server: &TestServer, username: &str) -> String {
    let fields = doctor_account(username);
    let response = server
        .post_form("/register/doctor/step1", &borrowed(&fields), None)
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/register/doctor/step2");
    session_cookie(&response).expect("step 1 should start a session")
}

async fn registration_step(server: &TestServer, username: &str) -> i64 {
    let identity = server
        .db
        .get_identity_by_username(username)
        .await
        .unwrap()
        .unwrap();
    server
        .db
        .get_doctor_profile(identity.id)
        .await
        .unwrap()
        .unwrap()
        .registration_step
}

#[tokio::test]
async fn doctor_completes_the_wizard() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let cookie = register_doctor(&server, "drayesha").await;
        let cookie = Some(cookie.as_str());
        assert_eq!(registration_step(&server, "drayesha").await, 1);

        // Step 2 view, then submit with a blank line in the middle.
        let response = server.get("/register/doctor/step2", cookie).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["view"], "doctor_register_step2");

        let response = server
            .post_form(
                "/register/doctor/step2",
                &[("specializations", "Cardiology\nNeurology\n\nPediatrics")],
                cookie,
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/register/doctor/step3");
        assert_eq!(registration_step(&server, "drayesha").await, 2);

        let identity = server
            .db
            .get_identity_by_username("drayesha")
            .await
            .unwrap()
            .unwrap();
        let profile = server.db.get_doctor_profile(identity.id).await.unwrap().unwrap();
        let names: Vec<String> = server
            .db
            .list_specializations(profile.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["Cardiology", "Neurology", "Pediatrics"]);

        // Step 3: invalid first, then valid.
        let response = server
            .post_form(
                "/register/doctor/step3",
                &[("hospital_name", "Shifa International"), ("consultation_fee", "abc")],
                cookie,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["view"], "doctor_register_step3");
        assert_eq!(body["errors"]["city"][0], "This field is required.");
        assert!(body["errors"]["consultation_fee"].is_array());
        assert_eq!(body["values"]["hospital_name"], "Shifa International");
        assert_eq!(registration_step(&server, "drayesha").await, 2);

        let response = server
            .post_form(
                "/register/doctor/step3",
                &[
                    ("hospital_name", "Shifa International"),
                    ("address", "H-8/4"),
                    ("city", "Islamabad"),
                    ("consultation_fee", "3000"),
                    ("years_of_experience", "10"),
                ],
                cookie,
            )
            .await;
        assert_eq!(location(&response), "/register/doctor/step4");

        let response = server
            .post_form(
                "/register/doctor/step4",
                &[
                    ("consultation_fee", "2500.00"),
                    ("available_days", "Mon,Wed,Fri"),
                    ("start_time", "17:00"),
                    ("end_time", "20:00"),
                    ("slot_minutes", "20"),
                ],
                cookie,
            )
            .await;
        assert_eq!(location(&response), "/register/doctor/step5");
        assert_eq!(registration_step(&server, "drayesha").await, 4);

        // Step 5: multipart upload.
        let form = Form::new().part(
            "profile_picture",
            Part::bytes(PNG.to_vec())
                .file_name("ayesha.png")
                .mime_str("image/png")
                .unwrap(),
        );
        let response = server
            .client
            .post(server.url("/register/doctor/step5"))
            .header(COOKIE, cookie.unwrap())
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/dashboard/doctor");
        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body["notice"],
            "Registration complete. Please wait for admin verification."
        );
        assert_eq!(registration_step(&server, "drayesha").await, 5);

        let profile = server.db.get_doctor_profile(identity.id).await.unwrap().unwrap();
        let reference = profile.profile_picture.expect("picture stored");
        let stored = std::fs::read(server.media_dir.path().join(&reference)).unwrap();
        assert_eq!(stored, PNG);

        // Dashboard dispatches to the doctor view with the profile.
        let response = server.get("/dashboard", cookie).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["view"], "doctor_dashboard");
        assert_eq!(body["doctor_profile"]["registration_step"], 5);
        assert_eq!(body["pending_verification"], true);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn oversized_picture_rerenders_step5_with_error() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let cookie = register_doctor(&server, "drbig").await;
        let cookie = Some(cookie.as_str());

        let steps: [(&str, Vec<(&str, &str)>); 3] = [
            ("/register/doctor/step2", vec![("specializations", "Dermatology")]),
            (
                "/register/doctor/step3",
                vec![
                    ("hospital_name", "Mayo Hospital"),
                    ("address", "Anarkali"),
                    ("city", "Lahore"),
                    ("consultation_fee", "1500"),
                    ("years_of_experience", "4"),
                ],
            ),
            (
                "/register/doctor/step4",
                vec![
                    ("consultation_fee", "1000"),
                    ("available_days", "Sat"),
                    ("start_time", "10:00"),
                    ("end_time", "12:00"),
                    ("slot_minutes", "30"),
                ],
            ),
        ];
        for (path, fields) in &steps {
            let response = server.post_form(path, fields, cookie).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "{path}");
        }
        assert_eq!(registration_step(&server, "drbig").await, 4);

        // 200 KiB against a 64 KiB limit.
        let mut big = PNG.to_vec();
        big.resize(200 * 1024, 0);
        let form = Form::new().part(
            "profile_picture",
            Part::bytes(big).file_name("big.png").mime_str("image/png").unwrap(),
        );
        let response = server
            .client
            .post(server.url("/register/doctor/step5"))
            .header(COOKIE, cookie.unwrap())
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["view"], "doctor_register_step5");
        let message = body["errors"]["profile_picture"][0].as_str().unwrap();
        assert!(message.contains("too large"), "{message}");

        assert_eq!(registration_step(&server, "drbig").await, 4);
        let identity = server
            .db
            .get_identity_by_username("drbig")
            .await
            .unwrap()
            .unwrap();
        let profile = server.db.get_doctor_profile(identity.id).await.unwrap().unwrap();
        assert!(profile.profile_picture.is_none());
        let stored = std::fs::read_dir(server.media_dir.path().join("profile_pictures"))
            .unwrap()
            .count();
        assert_eq!(stored, 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn out_of_sequence_steps_redirect_to_next_unmet_step() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let cookie = register_doctor(&server, "drskip").await;
        let cookie = Some(cookie.as_str());

        for path in ["/register/doctor/step3", "/register/doctor/step4", "/register/doctor/step5"] {
            let response = server.get(path, cookie).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "{path}");
            assert_eq!(location(&response), "/register/doctor/step2", "{path}");
        }

        // A skipped-ahead submission is not accepted.
        let response = server
            .post_form(
                "/register/doctor/step4",
                &[
                    ("consultation_fee", "2500"),
                    ("available_days", "Mon"),
                    ("start_time", "17:00"),
                    ("end_time", "20:00"),
                    ("slot_minutes", "20"),
                ],
                cookie,
            )
            .await;
        assert_eq!(location(&response), "/register/doctor/step2");
        assert_eq!(registration_step(&server, "drskip").await, 1);

        // Earlier steps stay open.
        let response = server.get("/register/doctor/step1", cookie).await;
        assert_eq!(response.status(), StatusCode::OK);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn anonymous_wizard_access_goes_to_login() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let response = server.get("/register/doctor/step3", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login?next=/register/doctor/step3");

        let response = server.get("/register/doctor/step1", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["view"], "doctor_register_step1");

        let response = server.get("/dashboard", Some("session_id=bogus")).await;
        assert_eq!(location(&response), "/login?next=/dashboard");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn patient_registers_logs_in_and_reaches_dashboard() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let fields = [
            ("username", "saad"),
            ("email", "saad@example.com"),
            ("password1", "s3cure-pass"),
            ("password2", "s3cure-pass"),
            ("full_name", "Saad Ahmed"),
            ("phone_no", "+92 300 1234567"),
        ];
        let response = server.post_form("/register/patient", &fields, None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
        assert!(session_cookie(&response).is_none());
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["notice"], "Registration successful. Please login.");

        let identity = server.db.get_identity_by_username("saad").await.unwrap().unwrap();
        assert!(server.db.get_patient_profile(identity.id).await.unwrap().is_some());

        // Same username again is a field error.
        let response = server.post_form("/register/patient", &fields, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body["errors"]["username"][0],
            "A user with that username already exists."
        );
        assert!(body["values"].get("password1").is_none());

        // Patients have no doctor profile, so wizard steps send them to step 1.
        let response = server
            .post_form(
                "/login",
                &[("username", "saad"), ("password", "s3cure-pass")],
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/dashboard");
        let cookie = session_cookie(&response).expect("login should set a cookie");

        let response = server.get("/register/doctor/step2", Some(&cookie)).await;
        assert_eq!(location(&response), "/register/doctor/step1");

        let response = server.get("/dashboard", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["view"], "patient_dashboard");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn login_failures_and_logout() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let cookie = register_doctor(&server, "drlogin").await;

        let response = server
            .post_form(
                "/login",
                &[("username", "drlogin"), ("password", "wrong-password")],
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(session_cookie(&response).is_none());
        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body["errors"]["__all__"][0],
            "Please enter a correct username and password."
        );

        // Unknown users get the same answer as a wrong password.
        let response = server
            .post_form(
                "/login",
                &[("username", "nobody-here"), ("password", "s3cure-pass")],
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(session_cookie(&response).is_none());
        let unknown: Value = response.json().await.unwrap();
        assert_eq!(unknown["errors"], body["errors"]);

        let response = server
            .post_form(
                "/login",
                &[
                    ("username", "drlogin"),
                    ("password", "s3cure-pass"),
                    ("next", "/register/doctor/step2"),
                ],
                None,
            )
            .await;
        assert_eq!(location(&response), "/register/doctor/step2");

        // Bearer tokens work too.
        let token = cookie.trim_start_matches("session_id=").to_string();
        let response = server
            .client
            .get(server.url("/dashboard/doctor"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = server
            .client
            .post(server.url("/logout"))
            .header(COOKIE, &cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(location(&response), "/");
        let cleared = response
            .headers()
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cleared.contains("Max-Age=0"));

        let response = server.get("/dashboard", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login?next=/dashboard");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn health_and_home() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let body: Value = server.get("/health", None).await.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        let body: Value = server.get("/", None).await.json().await.unwrap();
        assert_eq!(body["view"], "home");
    })
    .await
    .expect("test timed out");
}
