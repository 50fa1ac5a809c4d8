use std::{future::Future, sync::Arc, time::Duration};

use http_body_util::{BodyExt, Collected, Full};
use hyper::{
    body::Bytes,
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT},
    Method, Request, StatusCode, Uri,
};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use once_cell::sync::OnceCell;
use tokio::runtime::{Builder as RuntimeBuilder, Runtime};
use tracing::debug;
use url::{form_urlencoded, Url};

use super::{EndpointSettings, Transport, TransportError, TransportKind, DATABASE_NOT_FOUND};

type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// State shared by every HTTP transport created by the same connector.
///
/// Requests are driven by a current-thread runtime owned by the connector, which is created on first use.
#[derive(Default)]
pub(super) struct HttpContext {
    runtime: OnceCell<Arc<Runtime>>,
}

impl HttpContext {
    pub fn connect(&self, url: &str, settings: &EndpointSettings) -> Result<HttpTransport, TransportError> {
        let runtime = self
            .runtime
            .get_or_try_init(|| RuntimeBuilder::new_current_thread().enable_all().build().map(Arc::new))?;

        HttpTransport::new(Arc::clone(runtime), url, settings)
    }
}

/// Writes batches through the InfluxDB 1.x HTTP API.
pub(super) struct HttpTransport {
    runtime: Arc<Runtime>,
    client: HttpClient,
    write_uri: Uri,
    query_uri: Uri,
    database: String,
    auth: Option<HeaderValue>,
    user_agent: HeaderValue,
    timeout: Option<Duration>,
}

impl HttpTransport {
    fn new(runtime: Arc<Runtime>, url: &str, settings: &EndpointSettings) -> Result<Self, TransportError> {
        let base = Url::parse(url).map_err(|e| TransportError::Http(format!("invalid URL '{url}': {e}")))?;

        let mut write_params = vec![("db", settings.database.as_str())];
        if let Some(rp) = settings.retention_policy.as_deref().filter(|rp| !rp.is_empty()) {
            write_params.push(("rp", rp));
        }
        if let Some(consistency) = settings.write_consistency.as_deref().filter(|c| !c.is_empty()) {
            write_params.push(("consistency", consistency));
        }
        write_params.push(("precision", "ns"));

        let write_uri = endpoint_uri(&base, "write", &write_params)?;
        let query_uri = endpoint_uri(&base, "query", &[])?;

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(settings.timeout());

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(settings.tls.client_config()?)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);
        let client: HttpClient =
            Client::builder(TokioExecutor::new()).pool_idle_timeout(Duration::from_secs(30)).build(https);

        let auth = match &settings.username {
            Some(username) => Some(basic_auth(username, settings.password.as_deref())?),
            None => None,
        };
        let user_agent = HeaderValue::from_str(&settings.user_agent)
            .map_err(|e| TransportError::Http(format!("invalid user agent '{}': {e}", settings.user_agent)))?;

        Ok(Self {
            runtime,
            client,
            write_uri,
            query_uri,
            database: settings.database.clone(),
            auth,
            user_agent,
            timeout: settings.timeout(),
        })
    }

    fn request(
        &self,
        uri: &Uri,
        content_type: &'static str,
        body: Bytes,
    ) -> Result<Request<Full<Bytes>>, TransportError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri.clone())
            .header(CONTENT_TYPE, content_type)
            .header(USER_AGENT, self.user_agent.clone());
        if let Some(auth) = &self.auth {
            builder = builder.header(AUTHORIZATION, auth.clone());
        }

        builder.body(Full::new(body)).map_err(|e| TransportError::Http(format!("failed to build request: {e}")))
    }

    /// Sends the request and collects the response, bounded by the configured timeout.
    fn execute(&self, req: Request<Full<Bytes>>) -> Result<(StatusCode, String), TransportError> {
        let client = self.client.clone();
        let response = async move {
            let response = client.request(req).await.map_err(|e| TransportError::Http(format!("{e:?}")))?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map(Collected::to_bytes)
                .map_err(|e| TransportError::Http(format!("failed to read response body: {e}")))?;

            Ok::<_, TransportError>((status, String::from_utf8_lossy(&body).into_owned()))
        };

        self.block_on(response)
    }

    fn block_on<F>(&self, fut: F) -> Result<(StatusCode, String), TransportError>
    where
        F: Future<Output = Result<(StatusCode, String), TransportError>>,
    {
        match self.timeout {
            Some(timeout) => self.runtime.block_on(async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(timeout)),
                }
            }),
            None => self.runtime.block_on(fut),
        }
    }
}

impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let req = self.request(&self.write_uri, "text/plain; charset=utf-8", Bytes::copy_from_slice(payload))?;
        let (status, body) = self.execute(req)?;
        if status.is_success() {
            return Ok(());
        }

        if body.contains(DATABASE_NOT_FOUND) {
            return Err(TransportError::DatabaseNotFound { database: self.database.clone() });
        }

        Err(TransportError::Status { status: status.as_u16(), body })
    }

    fn create_namespace(&mut self, name: &str) -> Result<(), TransportError> {
        let query = format!("CREATE DATABASE \"{}\"", name.replace('"', "\\\""));
        let form = form_urlencoded::Serializer::new(String::new()).append_pair("q", &query).finish();

        let req = self.request(&self.query_uri, "application/x-www-form-urlencoded", Bytes::from(form))?;
        let (status, body) = self.execute(req)?;

        // Query errors are reported in the body, even with a successful status.
        if !status.is_success() || body.contains("\"error\"") {
            return Err(TransportError::Status { status: status.as_u16(), body });
        }

        debug!(database = name, uri = %self.query_uri, "Created database.");
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // Idle connections are closed when the client is dropped.
        Ok(())
    }
}

fn endpoint_uri(base: &Url, path: &str, params: &[(&str, &str)]) -> Result<Uri, TransportError> {
    let mut url = base.clone();
    let full_path = format!("{}/{path}", url.path().trim_end_matches('/'));
    url.set_path(&full_path);
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }

    url.as_str().parse::<Uri>().map_err(|e| TransportError::Http(format!("invalid URL '{url}': {e}")))
}

fn basic_auth(username: &str, password: Option<&str>) -> Result<HeaderValue, TransportError> {
    use base64::prelude::BASE64_STANDARD;
    use base64::write::EncoderWriter;
    use std::io::Write;

    let mut buf = b"Basic ".to_vec();
    {
        let mut encoder = EncoderWriter::new(&mut buf, &BASE64_STANDARD);
        write!(encoder, "{username}:")?;
        if let Some(password) = password {
            write!(encoder, "{password}")?;
        }
        encoder.finish()?;
    }

    let mut header =
        HeaderValue::from_bytes(&buf).map_err(|e| TransportError::Http(format!("invalid credentials: {e}")))?;
    header.set_sensitive(true);
    Ok(header)
}
