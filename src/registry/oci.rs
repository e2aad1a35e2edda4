use log::debug;
use oci_client::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_client::manifest::{OciDescriptor, OciImageManifest, OciManifest};
use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference};
use oci_spec::image::MediaType;
use std::collections::BTreeMap;
use std::io::Write;
use tokio::runtime::Runtime;

use super::{ImageWriter, ImagesMetadata, LayerDescriptor, Manifest, RegistryError};
use crate::archive::{self, PackagedArtifact};

/// Connection settings for [`RegistryClient`].
#[derive(Debug, Clone, Default)]
pub struct RegistryOpts {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Talk plain HTTP instead of HTTPS.
    pub insecure: bool,
}

impl RegistryOpts {
    fn auth(&self) -> RegistryAuth {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                RegistryAuth::Basic(username.clone(), password.clone())
            }
            _ => RegistryAuth::Anonymous,
        }
    }
}

/// OCI distribution client exposed through the blocking registry traits.
///
/// Each call is driven to completion on a private current-thread runtime, so callers
/// stay synchronous.
pub struct RegistryClient {
    client: Client,
    auth: RegistryAuth,
    runtime: Runtime,
}

impl RegistryClient {
    pub fn new(opts: &RegistryOpts) -> Result<Self, RegistryError> {
        let config = ClientConfig {
            protocol: if opts.insecure {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            },
            ..Default::default()
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(RegistryError::Runtime)?;

        Ok(Self {
            client: Client::new(config),
            auth: opts.auth(),
            runtime,
        })
    }

    fn request_error(reference: &Reference, err: impl std::fmt::Display) -> RegistryError {
        RegistryError::Request {
            reference: reference.whole(),
            message: err.to_string(),
        }
    }
}

impl ImagesMetadata for RegistryClient {
    fn resolve(&self, reference: &Reference) -> Result<String, RegistryError> {
        self.runtime
            .block_on(self.client.fetch_manifest_digest(reference, &self.auth))
            .map_err(|e| Self::request_error(reference, e))
    }

    fn manifest(&self, reference: &Reference) -> Result<Manifest, RegistryError> {
        let (manifest, digest) = self
            .runtime
            .block_on(self.client.pull_manifest(reference, &self.auth))
            .map_err(|e| Self::request_error(reference, e))?;

        let image = match manifest {
            OciManifest::Image(image) => image,
            _ => return Err(RegistryError::UnsupportedManifest(reference.whole())),
        };

        Ok(Manifest {
            digest,
            annotations: image
                .annotations
                .unwrap_or_default()
                .into_iter()
                .collect(),
            layers: image
                .layers
                .into_iter()
                .map(|layer| LayerDescriptor {
                    media_type: layer.media_type,
                    digest: layer.digest,
                    size: layer.size,
                })
                .collect(),
        })
    }

    /// Any failed lookup counts as "not there"; the registry gives no reliable way to
    /// tell a missing manifest from a denied one.
    fn exists(&self, reference: &Reference) -> Result<bool, RegistryError> {
        match self
            .runtime
            .block_on(self.client.fetch_manifest_digest(reference, &self.auth))
        {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!("Manifest lookup for {} failed: {}", reference, e);
                Ok(false)
            }
        }
    }

    fn fetch_layer(
        &self,
        reference: &Reference,
        layer: &LayerDescriptor,
        out: &mut dyn Write,
    ) -> Result<(), RegistryError> {
        let descriptor = OciDescriptor {
            media_type: layer.media_type.clone(),
            digest: layer.digest.clone(),
            size: layer.size,
            ..Default::default()
        };

        let mut data: Vec<u8> = Vec::new();
        self.runtime
            .block_on(self.client.pull_blob(reference, &descriptor, &mut data))
            .map_err(|e| Self::request_error(reference, e))?;

        out.write_all(&data).map_err(|source| RegistryError::Write {
            digest: layer.digest.clone(),
            source,
        })
    }
}

impl ImageWriter for RegistryClient {
    fn push(
        &self,
        reference: &Reference,
        artifact: &PackagedArtifact,
    ) -> Result<String, RegistryError> {
        let data = artifact.read_bytes().map_err(|source| RegistryError::Write {
            digest: artifact.digest().to_string(),
            source,
        })?;

        // Uncompressed layer: the diff id is the blob digest.
        let config_json = serde_json::json!({
            "architecture": "",
            "os": "",
            "rootfs": { "type": "layers", "diff_ids": [artifact.digest()] },
        });
        let config = Config::new(
            config_json.to_string().into_bytes(),
            MediaType::ImageConfig.to_string(),
            None,
        );
        let layers = vec![ImageLayer::new(data, archive::layer_media_type(), None)];

        let annotations: BTreeMap<String, String> = artifact.annotations();
        let manifest = OciImageManifest::build(
            &layers,
            &config,
            Some(annotations.into_iter().collect()),
        );

        let response = self
            .runtime
            .block_on(
                self.client
                    .push(reference, &layers, config, &self.auth, Some(manifest)),
            )
            .map_err(|e| Self::request_error(reference, e))?;
        debug!("Pushed manifest to {}", response.manifest_url);

        self.resolve(reference)
    }
}
