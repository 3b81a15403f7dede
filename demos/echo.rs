use serde_json::json;
use trellis_web::{
    include, limits::ServerLimits, path, ConditionalGetMiddleware, Context, HttpError,
    MethodRouter, Request, Response, Server, ServerError,
};

fn echo(req: &Request) -> Result<Response, HttpError> {
    let query = req.query()?.to_multi_map();
    let headers: Vec<_> = req.headers().iter().map(|(k, v)| json!([k, v])).collect();

    let body = match req.content_type() {
        Some(kind) if kind.starts_with("multipart/form-data") => {
            let form = req.multipart()?;
            let files: Vec<_> = form
                .files
                .iter()
                .map(|(field, file)| {
                    json!({
                        "field": field,
                        "file_name": file.file_name(),
                        "content_type": file.content_type(),
                        "size": file.size(),
                    })
                })
                .collect();
            json!({ "fields": form.fields.to_multi_map(), "files": files })
        }
        Some(kind) if kind.starts_with("application/x-www-form-urlencoded") => {
            json!({ "fields": req.form()?.to_multi_map() })
        }
        _ if req.is_json() => req.json()?.clone(),
        _ => json!(String::from_utf8_lossy(req.body())),
    };

    Ok(Response::json(&json!({
        "method": req.method().as_str(),
        "path": req.path(),
        "query": query,
        "headers": headers,
        "body": body,
    })))
}

fn main() {
    env_logger::init();

    let api = vec![
        path("/echo", "echo", |req, _, _| echo(req)),
        path(r"/echo/<word>(\w+)/<times>(\d+)", "repeat", |_, args, _| {
            let times: usize = args.parse("times")?;
            Ok(Response::ok(args.get("word").unwrap_or("").repeat(times.min(64))))
        }),
    ];

    let result = include("/api", api, "api")
        .map_err(ServerError::from)
        .and_then(|patterns| {
            Server::builder()
                .patterns(patterns)
                .handler(
                    "/status",
                    "status",
                    MethodRouter::new().get(|_, _, ctx: &Context| {
                        let site = ctx.get_setting("SITE_NAME").cloned().unwrap_or_default();
                        Ok(Response::json(&json!({ "site": site, "ok": true })))
                    }),
                )
                .middleware(ConditionalGetMiddleware)
                .context(Context::new().debug(true).setting("SITE_NAME", json!("echo demo")))
                .server_limits(ServerLimits {
                    port: 8080,
                    verbose: true,
                    ..ServerLimits::default()
                })
                .build()
        })
        .and_then(|server| server.launch());

    if let Err(err) = result {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
