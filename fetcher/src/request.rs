#[derive(Debug, Clone, Default)]
pub struct Request {
    pub(crate) url: String,
    pub(crate) headers: Option<Vec<(String, String)>>,
}

#[derive(Default)]
pub struct RequestBuilder {
    request: Request,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            request: Request::default(),
        }
    }

    pub fn set_url(mut self, url: impl Into<String>) -> Self {
        self.request.url = url.into();

        self
    }

    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request
            .headers
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));

        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}
