use serde_json::json;
use soloparentlove_client::auth::{Session, User};
use soloparentlove_client::models::Verdict;
use soloparentlove_client::AppClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const SELF_ID: &str = "11111111-1111-1111-1111-111111111111";
const OTHER_ID: &str = "22222222-2222-2222-2222-222222222222";

fn session_for(id: &str, email: &str) -> Session {
    Session {
        access_token: format!("token-{}", id),
        refresh_token: "refresh".to_string(),
        token_type: "bearer".to_string(),
        expires_in: 3600,
        expires_at: None,
        user: User {
            id: Uuid::parse_str(id).unwrap(),
            email: Some(email.to_string()),
            app_metadata: HashMap::new(),
            user_metadata: HashMap::new(),
            email_confirmed_at: None,
            created_at: None,
        },
    }
}

fn profile_row(id: &str, name: &str, gender: &str) -> serde_json::Value {
    json!({
        "id": id,
        "email": format!("{}@example.com", name.to_lowercase()),
        "full_name": name,
        "gender": gender,
        "age": 35,
        "city": "Denver",
        "state": "CO",
        "number_of_kids": 2,
        "co_parenting": false,
        "about": null,
        "photo_url": null,
        "created_at": "2025-01-01T00:00:00Z"
    })
}

fn own_profile() -> soloparentlove_client::models::Profile {
    serde_json::from_value(profile_row(SELF_ID, "Jamie", "Female")).unwrap()
}

#[tokio::test]
async fn refresh_applies_every_exclusion_filter() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/likes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "liked_user_id": OTHER_ID }
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let app = AppClient::new(&mock_server.uri(), "test_anon_key").unwrap();
    app.auth()
        .set_session(session_for(SELF_ID, "jamie@example.com"));

    let mut feed = app.discovery(&own_profile()).unwrap();
    feed.refresh().await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    let profile_fetch = requests
        .iter()
        .find(|r| r.url.path() == "/rest/v1/profiles")
        .expect("profiles should be queried");

    let pairs: Vec<(String, String)> = profile_fetch
        .url
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    // Never the user themself
    assert!(pairs.contains(&("id".to_string(), format!("not.eq.{}", SELF_ID))));
    // Never an already-decided target, regardless of verdict
    assert!(pairs.contains(&("id".to_string(), format!("not.in.({})", OTHER_ID))));
    // Opposite gender only
    assert!(pairs.contains(&("gender".to_string(), "neq.Female".to_string())));
    // No half-finished profiles
    assert!(pairs.contains(&("full_name".to_string(), "not.is.null".to_string())));
    assert!(pairs.contains(&("limit".to_string(), "10".to_string())));
}

#[tokio::test]
async fn like_then_skip_advances_cursor_and_writes_both_decisions() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/likes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let candidates: Vec<serde_json::Value> = (0..10)
        .map(|i| {
            profile_row(
                &format!("33333333-3333-3333-3333-33333333330{}", i),
                &format!("Candidate{}", i),
                "Male",
            )
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(candidates)))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/likes"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&mock_server)
        .await;

    let app = AppClient::new(&mock_server.uri(), "test_anon_key").unwrap();
    app.auth()
        .set_session(session_for(SELF_ID, "jamie@example.com"));

    let mut feed = app.discovery(&own_profile()).unwrap();
    feed.refresh().await.unwrap();
    assert_eq!(feed.cursor(), 0);
    assert_eq!(feed.remaining(), 10);

    let first = feed.current().unwrap().id;
    assert!(feed.record_decision(Verdict::Like));
    let second = feed.current().unwrap().id;
    assert!(feed.record_decision(Verdict::Skip));
    assert_eq!(feed.cursor(), 2);

    feed.flush().await;

    let requests = mock_server.received_requests().await.unwrap();
    let writes: Vec<serde_json::Value> = requests
        .iter()
        .filter(|r| r.url.path() == "/rest/v1/likes" && r.method.to_string() == "POST")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();

    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0]["type"], "like");
    assert_eq!(writes[0]["liked_user_id"], first.to_string());
    assert_eq!(writes[0]["user_id"], SELF_ID);
    assert_eq!(writes[1]["type"], "skip");
    assert_eq!(writes[1]["liked_user_id"], second.to_string());
}

#[tokio::test]
async fn deciding_on_an_exhausted_queue_is_a_no_op() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/likes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let app = AppClient::new(&mock_server.uri(), "test_anon_key").unwrap();
    app.auth()
        .set_session(session_for(SELF_ID, "jamie@example.com"));

    let mut feed = app.discovery(&own_profile()).unwrap();
    feed.refresh().await.unwrap();

    assert!(feed.is_exhausted());
    assert!(!feed.record_decision(Verdict::Like));
    assert_eq!(feed.cursor(), 0);
    feed.flush().await;

    let requests = mock_server.received_requests().await.unwrap();
    assert!(!requests
        .iter()
        .any(|r| r.url.path() == "/rest/v1/likes" && r.method.to_string() == "POST"));
}

#[tokio::test]
async fn failed_refresh_keeps_queue_and_cursor_intact() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/likes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            profile_row(OTHER_ID, "Alex", "Male"),
            profile_row("44444444-4444-4444-4444-444444444444", "Sam", "Male"),
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/likes"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&mock_server)
        .await;

    let app = AppClient::new(&mock_server.uri(), "test_anon_key").unwrap();
    app.auth()
        .set_session(session_for(SELF_ID, "jamie@example.com"));

    let mut feed = app.discovery(&own_profile()).unwrap();
    feed.refresh().await.unwrap();
    feed.record_decision(Verdict::Like);
    assert_eq!(feed.cursor(), 1);
    let current_before = feed.current().unwrap().id;

    // The backend starts failing; the refresh surfaces an error state but
    // must not corrupt what the user is looking at
    mock_server.reset().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/likes"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    assert!(feed.refresh().await.is_err());
    assert!(feed.last_error().is_some());
    assert_eq!(feed.cursor(), 1);
    assert_eq!(feed.current().unwrap().id, current_before);
}

#[tokio::test]
async fn incomplete_profile_cannot_enter_discovery() {
    let mock_server = MockServer::start().await;
    let app = AppClient::new(&mock_server.uri(), "test_anon_key").unwrap();

    let mut incomplete = own_profile();
    incomplete.full_name = None;

    assert!(app.discovery(&incomplete).is_err());
}

// ---------------------------------------------------------------------------
// Mutual-like match trigger, modeled by a stateful fake backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TriggerState {
    likes: Vec<(String, String, String)>,
    matches: Vec<(String, String, String)>,
}

/// POST /rest/v1/likes with the backend's new-like trigger semantics:
/// when both directions of a like exist, a match row appears.
struct LikesWithTrigger(Arc<Mutex<TriggerState>>);

impl Respond for LikesWithTrigger {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let user_id = body["user_id"].as_str().unwrap_or_default().to_string();
        let liked_user_id = body["liked_user_id"].as_str().unwrap_or_default().to_string();
        let verdict = body["type"].as_str().unwrap_or_default().to_string();

        let mut state = self.0.lock().unwrap();
        let mutual = verdict == "like"
            && state
                .likes
                .iter()
                .any(|(u, l, t)| u == &liked_user_id && l == &user_id && t == "like");
        state.likes.push((user_id.clone(), liked_user_id.clone(), verdict));
        if mutual {
            state
                .matches
                .push((Uuid::new_v4().to_string(), liked_user_id, user_id));
        }
        ResponseTemplate::new(201)
    }
}

/// POST /rest/v1/rpc/get_matches_with_profiles over the same state
struct MatchesRpc(Arc<Mutex<TriggerState>>);

impl Respond for MatchesRpc {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let user_id = body["p_user_id"].as_str().unwrap_or_default().to_string();

        let state = self.0.lock().unwrap();
        let rows: Vec<serde_json::Value> = state
            .matches
            .iter()
            .filter(|(_, a, b)| a == &user_id || b == &user_id)
            .map(|(id, a, b)| {
                let other = if a == &user_id { b } else { a };
                json!({
                    "id": id,
                    "user1_id": a,
                    "user2_id": b,
                    "created_at": "2025-06-01T12:00:00Z",
                    "other_user": profile_row(other, "Other", "Male")
                })
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!(rows))
    }
}

#[tokio::test]
async fn mutual_likes_become_a_match_observable_from_both_sides() {
    let mock_server = MockServer::start().await;
    let state = Arc::new(Mutex::new(TriggerState::default()));

    Mock::given(method("GET"))
        .and(path("/rest/v1/likes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/likes"))
        .respond_with(LikesWithTrigger(state.clone()))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/get_matches_with_profiles"))
        .respond_with(MatchesRpc(state.clone()))
        .mount(&mock_server)
        .await;

    // Each side sees only the other in its queue
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("gender", "neq.Female"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([profile_row(OTHER_ID, "Alex", "Male")])),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("gender", "neq.Male"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([profile_row(SELF_ID, "Jamie", "Female")])),
        )
        .mount(&mock_server)
        .await;

    let app_a = AppClient::new(&mock_server.uri(), "test_anon_key").unwrap();
    app_a
        .auth()
        .set_session(session_for(SELF_ID, "jamie@example.com"));
    let app_b = AppClient::new(&mock_server.uri(), "test_anon_key").unwrap();
    app_b
        .auth()
        .set_session(session_for(OTHER_ID, "alex@example.com"));

    let profile_a = own_profile();
    let profile_b: soloparentlove_client::models::Profile =
        serde_json::from_value(profile_row(OTHER_ID, "Alex", "Male")).unwrap();

    let mut feed_a = app_a.discovery(&profile_a).unwrap();
    feed_a.refresh().await.unwrap();
    assert!(feed_a.record_decision(Verdict::Like));
    feed_a.flush().await;

    let mut feed_b = app_b.discovery(&profile_b).unwrap();
    feed_b.refresh().await.unwrap();
    assert!(feed_b.record_decision(Verdict::Like));
    feed_b.flush().await;

    let matches_a = app_a.matches();
    let for_a = matches_a
        .list_for_user(Uuid::parse_str(SELF_ID).unwrap())
        .await
        .unwrap();
    assert_eq!(for_a.len(), 1);
    assert_eq!(for_a[0].other_user.id, Uuid::parse_str(OTHER_ID).unwrap());

    let for_b = app_b
        .matches()
        .list_for_user(Uuid::parse_str(OTHER_ID).unwrap())
        .await
        .unwrap();
    assert_eq!(for_b.len(), 1);
    assert_eq!(for_b[0].other_user.id, Uuid::parse_str(SELF_ID).unwrap());
}
