use async_trait::async_trait;

use crate::api::{
    CreateNode, Error, Gateway, ImageUpload, Node, NodeId, UpdateNode, Vote, VoteCounts,
    VoteRequest, VoteResponse,
};

/// [`Gateway`] over HTTP against the real backend.
pub struct HttpGateway {
    client: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl HttpGateway {
    /// `base` is scheme plus authority, with or without a trailing slash.
    /// The token, when given, is sent as a bearer token on every request.
    pub fn new(base: impl Into<String>, token: Option<String>) -> HttpGateway {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        HttpGateway {
            client: reqwest::Client::new(),
            base,
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn run(&self, req: reqwest::RequestBuilder) -> Result<Vec<u8>, Error> {
        let req = match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let resp = req
            .send()
            .await
            .map_err(|err| Error::Network(err.to_string()))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|err| Error::Network(err.to_string()))?;
        if !status.is_success() {
            return Err(Error::parse(&body)
                .unwrap_or_else(|_| Error::Unknown(format!("got status {status}"))));
        }
        Ok(body.to_vec())
    }

    async fn fetch<R>(&self, req: reqwest::RequestBuilder) -> Result<R, Error>
    where
        R: for<'de> serde::Deserialize<'de>,
    {
        let body = self.run(req).await?;
        serde_json::from_slice(&body)
            .map_err(|err| Error::Unknown(format!("unparseable response: {err}")))
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn list_roots(&self) -> Result<Vec<Node>, Error> {
        self.fetch(self.client.get(self.url("/api/nodes"))).await
    }

    async fn get_detail(&self, id: NodeId, depth: u32) -> Result<Node, Error> {
        self.fetch(
            self.client
                .get(self.url(&format!("/api/nodes/{}", id.0)))
                .query(&[("depth", depth)]),
        )
        .await
    }

    async fn create(&self, req: &CreateNode) -> Result<Node, Error> {
        self.fetch(self.client.post(self.url("/api/nodes")).json(req))
            .await
    }

    async fn update(&self, id: NodeId, req: &UpdateNode) -> Result<Node, Error> {
        self.fetch(
            self.client
                .patch(self.url(&format!("/api/nodes/{}", id.0)))
                .json(req),
        )
        .await
    }

    async fn upload_images(&self, id: NodeId, images: Vec<ImageUpload>) -> Result<(), Error> {
        let mut form = reqwest::multipart::Form::new();
        for image in images {
            image.validate()?;
            let part = reqwest::multipart::Part::bytes(image.bytes)
                .file_name(image.filename)
                .mime_str(&image.content_type)
                .map_err(|err| Error::InvalidImage(err.to_string()))?;
            form = form.part("files", part);
        }
        self.run(
            self.client
                .post(self.url(&format!("/api/nodes/{}/images", id.0)))
                .multipart(form),
        )
        .await?;
        Ok(())
    }

    async fn vote(&self, id: NodeId, direction: Vote) -> Result<VoteResponse, Error> {
        self.fetch(
            self.client
                .post(self.url(&format!("/api/nodes/{}/vote", id.0)))
                .json(&VoteRequest { direction }),
        )
        .await
    }

    async fn delete(&self, id: NodeId) -> Result<(), Error> {
        self.run(self.client.delete(self.url(&format!("/api/nodes/{}", id.0))))
            .await?;
        Ok(())
    }

    async fn vote_counts(&self, id: NodeId) -> Result<VoteCounts, Error> {
        self.fetch(
            self.client
                .get(self.url(&format!("/api/nodes/{}/votes", id.0))),
        )
        .await
    }

    fn image_base(&self) -> Option<String> {
        Some(self.base.clone())
    }
}
