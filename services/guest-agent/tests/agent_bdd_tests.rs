use axum::body::Body;
use axum::http::Request;
use axum::Router;
use cucumber::{given, then, when, World};
use guest_agent::{router, AgentState};
use guest_lifecycle::*;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

#[derive(Debug, World)]
#[world(init = Self::new)]
struct AgentWorld {
    dir: TempDir,
    instance_id: String,
    runner: ScriptedRunner,
    app: Option<Router>,
    response_code: u16,
    response_body: Value,
}

impl AgentWorld {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            instance_id: String::new(),
            runner: ScriptedRunner::new(),
            app: None,
            response_code: 0,
            response_body: Value::Null,
        }
    }

    /// Builds the agent the way the binary does, over a status directory
    /// that outlives it.
    async fn boot(&mut self) {
        let profile = Arc::new(ServiceProfile::redis());
        let runner: Arc<dyn CommandRunner> = Arc::new(self.runner.clone());
        let store = Arc::new(FileStatusStore::new(self.dir.path().join("state")));
        let tracker = TrackerSlot::new(
            self.instance_id.clone(),
            store,
            Arc::clone(&runner),
            Arc::clone(&profile),
        )
        .init()
        .await
        .unwrap();
        let volumes = Arc::new(CommandVolumeProvider::new(
            Arc::clone(&runner),
            Arc::clone(&profile),
        ));
        let manager = Arc::new(LifecycleManager::new(tracker, runner, profile, volumes));
        self.app = Some(router(AgentState::new(manager)));
    }

    async fn send(&mut self, method: &str, uri: &str, body: Option<String>) {
        let app = self.app.clone().expect("agent not running");
        let mut request = Request::builder().method(method).uri(uri);
        if body.is_some() {
            request = request.header("content-type", "application/json");
        }
        let request = request
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        self.response_code = response.status().as_u16();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        self.response_body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    }
}

#[given(expr = "a running agent for instance {string}")]
async fn given_running_agent(world: &mut AgentWorld, instance_id: String) {
    world.instance_id = instance_id;
    world.boot().await;
}

#[given("the service process is running")]
async fn given_process_running(world: &mut AgentWorld) {
    world
        .runner
        .respond_stdout("ps aux", "redis 812 /usr/bin/redis-server *:6379\n");
}

#[given(expr = "{string} fails")]
async fn given_command_fails(world: &mut AgentWorld, command: String) {
    world.runner.fail(command, 1, "job failed");
}

#[when(expr = "I request {word} {string}")]
async fn when_request(world: &mut AgentWorld, method: String, uri: String) {
    world.send(&method, &uri, None).await;
}

#[when(expr = "I post to {string} with body {string}")]
async fn when_post_body(world: &mut AgentWorld, uri: String, body: String) {
    world.send("POST", &uri, Some(body)).await;
}

#[when("the agent is restarted")]
async fn when_agent_restarted(world: &mut AgentWorld) {
    world.runner = ScriptedRunner::new();
    world.boot().await;
}

#[then(expr = "the response code should be {int}")]
async fn then_response_code(world: &mut AgentWorld, expected: u16) {
    assert_eq!(world.response_code, expected, "{}", world.response_body);
}

#[then(expr = "the response field {string} should be {string}")]
async fn then_response_field(world: &mut AgentWorld, field: String, expected: String) {
    let actual = match &world.response_body[field.as_str()] {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    assert_eq!(actual, expected, "{}", world.response_body);
}

#[then(expr = "{string} should have run")]
async fn then_command_ran(world: &mut AgentWorld, command: String) {
    assert_eq!(world.runner.count(&command), 1, "{:?}", world.runner.journal());
}

#[tokio::main]
async fn main() {
    AgentWorld::run("tests/features").await;
}
