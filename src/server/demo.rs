//! Small downstream application used by the bundled binary.

use std::time::Duration;

use crate::core::{Backend, Context, Error, Request, Response};
use crate::middleware::Handler;

const INDEX_HTML: &str = "<!DOCTYPE html>\n<html><head><title>Request tracker</title>\
<link rel=\"stylesheet\" href=\"/assets/app.css\"></head>\
<body><h1>It works</h1><script src=\"/assets/app.js\"></script></body></html>\n";

const APP_CSS: &str = "body { font-family: sans-serif; }\n";
const APP_JS: &str = "console.log(\"loaded\");\n";

/// Demo downstream handler.
///
/// - `/` - HTML page, reports one SQL and one redis call
/// - `/srv/status` - plain `ok`
/// - `/assets/*` - static assets, flagged as asset requests
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoApp;

impl DemoApp {
    pub fn new() -> Self {
        Self
    }
}

impl Handler for DemoApp {
    fn call(&self, req: Request, ctx: &mut Context) -> Result<Response, Error> {
        let path = req.path();

        if let Some(asset) = path.strip_prefix("/assets/") {
            ctx.mark_asset_path();
            let res = match asset {
                "app.css" => Response::builder()
                    .content_type("text/css")
                    .body(APP_CSS)
                    .build(),
                "app.js" => Response::builder()
                    .content_type("application/javascript")
                    .body(APP_JS)
                    .build(),
                _ => Response::not_found(),
            };
            return Ok(res);
        }

        let res = match path {
            "/" => {
                ctx.time_backend_call(Backend::Sql, || {
                    std::thread::sleep(Duration::from_millis(1))
                });
                ctx.record_backend_call(Backend::Redis, Duration::from_micros(200));
                Response::builder().html().body(INDEX_HTML).build()
            }
            "/srv/status" => Response::builder().text().body("ok").build(),
            _ => Response::not_found(),
        };

        Ok(res)
    }
}
