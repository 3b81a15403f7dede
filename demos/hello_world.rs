use trellis_web::{limits::ServerLimits, Response, Server};

fn main() {
    env_logger::init();

    let result = Server::builder()
        .route("/", |_, _, _| {
            let mut resp = Response::ok("Hello, world!");
            resp.set_header("Content-Type", "text/plain");
            Ok(resp)
        })
        .server_limits(ServerLimits {
            port: 8080,
            verbose: true,
            ..ServerLimits::default()
        })
        .build()
        .and_then(|server| server.launch());

    if let Err(err) = result {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
