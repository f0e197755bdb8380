use std::ops::Deref;

use reqwest::{Client, ClientBuilder};

/// Thin wrapper over [reqwest::Client] that pins the headers every request
/// of one acquisition shares, such as a CDN cookie grant.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> Self {
        let client = builder.build().unwrap();

        Self { client }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
