use http::{Method, StatusCode};
use micro_app::{
    AppConfig, Application, HandlerError, HttpException, Json, Next, Request, RequestContext, Response, fn_middleware,
    handler_fn,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{Level, info};

#[derive(Deserialize, Debug)]
struct User {
    name: String,
    zip: String,
}

fn root(req: &RequestContext) -> Result<Json<serde_json::Value>, HandlerError> {
    let config = req.service::<AppConfig>().ok_or("config is not bound")?;
    Ok(Json(json!({ "name": config.name, "version": config.version })))
}

fn create_user(req: &RequestContext) -> Result<String, HandlerError> {
    let user: User = req.json()?;
    if user.name.is_empty() {
        return Err(HttpException::new(StatusCode::UNPROCESSABLE_ENTITY, "name is required").into());
    }
    Ok(format!("created {} ({})", user.name, user.zip))
}

fn access_log(req: &mut Request, next: Next<'_>) -> Result<Response, HandlerError> {
    let method = req.method().clone();
    let path = req.path().to_string();
    let response = next.run(req);
    match &response {
        Ok(resp) => info!(%method, path, status = resp.status().as_u16(), "request handled"),
        Err(e) => info!(%method, path, cause = %e, "request failed"),
    }
    response
}

fn main() {
    micro_app::logging::init(Level::INFO).expect("setting default subscriber failed");

    let app = Application::builder()
        .config(AppConfig::default().with_name("hello").with_debug(true))
        .middleware(fn_middleware(access_log))
        .get("/", handler_fn(root))
        .get("/users/{id}", handler_fn(|req| Json(json!({ "id": req.param("id") }))))
        .post("/users", handler_fn(create_user))
        .boot()
        .expect("application should boot");

    let requests = [
        http::Request::get("/").body(String::new()),
        http::Request::get("/users/5").body(String::new()),
        http::Request::post("/users")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(r#"{"name":"hello","zip":"world"}"#.to_string()),
        http::Request::post("/users")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(r#"{"name":"","zip":"world"}"#.to_string()),
        http::Request::builder().method(Method::DELETE).uri("/users/5").body(String::new()),
        http::Request::get("/missing").body(String::new()),
    ];

    for request in requests {
        let request = request.expect("request should be valid");
        let response = app.handle(request);
        println!("{} {}", response.status(), String::from_utf8_lossy(response.body().as_bytes()));
    }
}
