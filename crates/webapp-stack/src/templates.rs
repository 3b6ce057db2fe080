//! Files injected into the nginx container.
//!
//! The engine treats these as opaque content; only their digests matter to
//! the reconciler.

use crate::params::StackParams;

pub const NGINX_CONF_PATH: &str = "/etc/nginx/nginx.conf";
pub const INDEX_HTML_PATH: &str = "/usr/share/nginx/html/index.html";

/// Network alias redis is reachable under.
pub const REDIS_HOST: &str = "redis";
pub const REDIS_INTERNAL_PORT: u16 = 6379;

pub fn nginx_conf() -> String {
    format!(
        r#"
events {{
    worker_connections 1024;
}}

http {{
    upstream redis_backend {{
        server {REDIS_HOST}:{REDIS_INTERNAL_PORT};
    }}

    server {{
        listen 80;
        location / {{
            root /usr/share/nginx/html;
            index index.html;
        }}

        location /health {{
            access_log off;
            return 200 "healthy\n";
            add_header Content-Type text/plain;
        }}
    }}
}}"#
    )
}

pub fn index_html(params: &StackParams) -> String {
    let StackParams { stack, port } = params;
    let redis_port = params.redis_port();
    format!(
        r#"
<!DOCTYPE html>
<html>
<head>
    <title>Docker Stack Demo - {stack}</title>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 40px; background: #f5f5f5; }}
        .container {{ background: white; padding: 20px; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }}
        .header {{ color: #2563eb; border-bottom: 2px solid #2563eb; padding-bottom: 10px; }}
        .info {{ margin: 20px 0; padding: 15px; background: #eff6ff; border-radius: 4px; }}
    </style>
</head>
<body>
    <div class="container">
        <h1 class="header">🚀 Docker Stack Demo</h1>
        <div class="info">
            <h2>Stack: {stack}</h2>
            <p><strong>Port:</strong> {port}</p>
            <p><strong>Redis Port:</strong> {redis_port}</p>
            <p><strong>Status:</strong> ✅ Running</p>
        </div>
        <p>This Nginx server is running in a Docker container managed by webapp-stack!</p>
        <p>Redis is available at: {REDIS_HOST}:{REDIS_INTERNAL_PORT} (internal network)</p>
        <p><a href="/health">Health Check</a></p>
    </div>
</body>
</html>"#
    )
}
