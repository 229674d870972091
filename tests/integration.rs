use examcrafter_backend::{build_state, config::Config, routes::build_router};
use reqwest::StatusCode;
use serde_json::{json, Value};

async fn spawn_server() -> (String, reqwest::Client) {
    let state = build_state(Config::default()).expect("state");
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), reqwest::Client::new())
}

struct Session<'a> {
    base: &'a str,
    client: &'a reqwest::Client,
    uid: &'static str,
    email: &'static str,
}

impl<'a> Session<'a> {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base, path))
            .header("x-user-id", self.uid)
            .header("x-user-email", self.email)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.request(reqwest::Method::GET, path).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }
}

fn legacy_rows() -> Value {
    json!({
        "rows": [
            {"intrebare": "Capitala Frantei?", "varianta_a": "Paris", "varianta_b": "Berlin", "raspuns_corect": "a"},
            {"intrebare": "Numere pare?", "varianta_a": "2", "varianta_b": "3", "varianta_c": "4", "raspuns_corect": "a,c"},
            {"intrebare": "Fara variante", "varianta_a": "singura"},
            {"intrebare": "", "varianta_a": "x", "varianta_b": "y"}
        ]
    })
}

async fn create_set(session: &Session<'_>, name: &str, visibility: &str) -> String {
    let (status, set) = session
        .post("/api/v1/sets", json!({"name": name, "tags": ["geo, math"], "visibility": visibility}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    set["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn authoring_sharing_and_quiz_flow() {
    let (base, client) = spawn_server().await;
    let ana = Session { base: &base, client: &client, uid: "ana", email: "ana@x.io" };
    let bob = Session { base: &base, client: &client, uid: "bob", email: "Bob@X.io" };

    let set_id = create_set(&ana, "Geografie", "private").await;

    let (status, report) = ana.post(&format!("/api/v1/sets/{}/import", set_id), legacy_rows()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["imported"], 2);
    assert_eq!(report["dropped"], 2);

    let (status, question) = ana
        .post(
            &format!("/api/v1/sets/{}/questions", set_id),
            json!({
                "intrebare": "Cel mai lung rau?",
                "options": [{"id": "a", "text": "Nil"}, {"id": "b", "text": "Dunare"}],
                "correctAnswers": ["a"]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(question["raspuns_corect"], "a");

    // Private and unshared: invisible to bob.
    let (_, sets) = bob.get("/api/v1/sets").await;
    assert_eq!(sets["total"], 0);
    let (status, _) = bob
        .post("/api/v1/quiz/start", json!({"sourceKind": "set", "sourceId": set_id, "requestedCount": 3}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, shared) = ana
        .post(&format!("/api/v1/sets/{}/share", set_id), json!({"email": "BOB@x.io"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shared["sharedWith"], json!(["bob@x.io"]));

    let (_, sets) = bob.get("/api/v1/sets").await;
    assert_eq!(sets["total"], 1);
    assert_eq!(sets["items"][0]["access"], "shared");
    assert_eq!(sets["items"][0]["questionCount"], 3);

    let (status, quiz) = bob
        .post("/api/v1/quiz/start", json!({"sourceKind": "set", "sourceId": set_id, "requestedCount": 3}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(quiz["totalQuestions"], 3);
    assert!(quiz["questions"][0].get("correctAnswers").is_none());

    let ids: Vec<String> = quiz["questions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["id"].as_str().unwrap().to_string())
        .collect();
    let answers = [json!("a"), json!(["C", "a"]), json!("b")];
    for (i, (id, answer)) in ids.iter().zip(answers.iter()).enumerate() {
        let (status, body) = bob
            .post("/api/v1/quiz/answer", json!({"questionId": id, "answer": answer}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["correct"], i < 2);
        assert!(body["quiz"]["questions"][i].get("correctAnswers").is_some());

        let (status, view) = bob.post("/api/v1/quiz/advance", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["finished"], i == 2);
    }

    let (status, result) = bob.post("/api/v1/quiz/finish", json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(result["correctAnswers"], 2);
    assert_eq!(result["totalQuestions"], 3);
    assert_eq!(result["passed"], true);
    assert_eq!(result["sourceName"], "Geografie");

    let (status, _) = bob.get("/api/v1/quiz").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, history) = bob.get("/api/v1/history").await;
    assert_eq!(history["total"], 1);
    let (_, history) = ana.get("/api/v1/history").await;
    assert_eq!(history["total"], 0);
}

#[tokio::test]
async fn bundle_quiz_draws_from_all_member_sets() {
    let (base, client) = spawn_server().await;
    let ana = Session { base: &base, client: &client, uid: "ana", email: "ana@x.io" };
    let eve = Session { base: &base, client: &client, uid: "eve", email: "eve@x.io" };

    let first = create_set(&ana, "Set A", "private").await;
    let second = create_set(&ana, "Set B", "public").await;
    ana.post(&format!("/api/v1/sets/{}/import", first), legacy_rows()).await;
    ana.post(&format!("/api/v1/sets/{}/import", second), legacy_rows()).await;

    let (status, bundle) = ana
        .post(
            "/api/v1/bundles",
            json!({"name": "Mix", "setIds": [first, second], "questionCount": 50, "visibility": "public"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(bundle["totalAvailableQuestions"], 4);
    assert_eq!(bundle["questionCount"], 4);
    let bundle_id = bundle["id"].as_str().unwrap().to_string();

    let (_, bundles) = eve.get("/api/v1/bundles").await;
    assert_eq!(bundles["items"][0]["access"], "public");

    let (status, quiz) = eve
        .post(
            "/api/v1/quiz/start",
            json!({"sourceKind": "bundle", "sourceId": bundle_id, "requestedCount": 10, "randomize": true}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(quiz["totalQuestions"], 4);
    let from_first = quiz["questions"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|q| q["id"].as_str().unwrap().starts_with(&format!("{}-", first)))
        .count();
    assert_eq!(from_first, 2);

    let (status, _) = eve
        .post("/api/v1/quiz/answer", json!({"questionId": "nope", "answer": "a"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = eve.post("/api/v1/quiz/advance", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let resp = eve.request(reqwest::Method::DELETE, "/api/v1/quiz").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn empty_set_cannot_start_a_quiz() {
    let (base, client) = spawn_server().await;
    let ana = Session { base: &base, client: &client, uid: "ana", email: "ana@x.io" };
    let set_id = create_set(&ana, "Gol", "private").await;

    let (status, body) = ana
        .post("/api/v1/quiz/start", json!({"sourceKind": "set", "sourceId": set_id, "requestedCount": 5}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "EMPTY_QUESTION_POOL");

    let (status, body) = ana
        .post("/api/v1/bundles", json!({"name": "Gol", "setIds": [set_id]}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn export_uses_the_legacy_layout() {
    let (base, client) = spawn_server().await;
    let ana = Session { base: &base, client: &client, uid: "ana", email: "ana@x.io" };
    let set_id = create_set(&ana, "Export", "public").await;
    ana.post(&format!("/api/v1/sets/{}/import", set_id), legacy_rows()).await;

    let (status, exported) = ana.get(&format!("/api/v1/sets/{}/export", set_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(exported[1]["raspuns_corect"], "a,c");
    assert_eq!(exported[1]["varianta_c"], "4");
    assert_eq!(exported[1]["allowMultiple"], true);

    let (status, template) = ana.get("/api/v1/import/template").await;
    assert_eq!(status, StatusCode::OK);
    assert!(template[0]["varianta_a"].is_string());

    let resp = client
        .get(format!("{}/api/v1/me", base))
        .header("x-request-id", "req-1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["request_id"], "req-1");
}

#[tokio::test]
async fn concurrent_finish_records_one_result() {
    let (base, client) = spawn_server().await;
    let ana = Session { base: &base, client: &client, uid: "ana", email: "ana@x.io" };
    let set_id = create_set(&ana, "Dublu", "private").await;
    ana.post(&format!("/api/v1/sets/{}/import", set_id), legacy_rows()).await;

    let (status, _) = ana.post("/api/v1/quiz/finish", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, quiz) = ana
        .post("/api/v1/quiz/start", json!({"sourceKind": "set", "sourceId": set_id, "requestedCount": 2}))
        .await;
    let first = quiz["questions"][0]["id"].as_str().unwrap().to_string();
    let second = quiz["questions"][1]["id"].as_str().unwrap().to_string();

    ana.post("/api/v1/quiz/answer", json!({"questionId": first, "answer": "a"})).await;
    let (status, _) = ana.post("/api/v1/quiz/finish", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Answers only go to the current question.
    let (status, body) = ana
        .post("/api/v1/quiz/answer", json!({"questionId": second, "answer": "a"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "QUIZ_STATE");

    ana.post("/api/v1/quiz/advance", json!({})).await;
    ana.post("/api/v1/quiz/answer", json!({"questionId": second, "answer": ["a", "c"]})).await;
    let (_, view) = ana.post("/api/v1/quiz/advance", json!({})).await;
    assert_eq!(view["finished"], true);

    let (a, b) = tokio::join!(
        ana.post("/api/v1/quiz/finish", json!({})),
        ana.post("/api/v1/quiz/finish", json!({}))
    );
    let mut statuses = vec![a.0, b.0];
    statuses.sort_by_key(|s| s.as_u16());
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::NOT_FOUND]);

    let (_, history) = ana.get("/api/v1/history").await;
    assert_eq!(history["total"], 1);
    assert_eq!(history["items"][0]["correctAnswers"], 2);
}
