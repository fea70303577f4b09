use lazy_static::lazy_static;

use crate::{
    bson::{Bson, Document},
    cmap::conn::{Connection, StreamDescription},
    doc,
    error::Result,
    hello::{hello_command, HelloReply},
};

lazy_static! {
    /// Contains the basic handshake information that can be statically determined. This
    /// document (potentially with additional fields added) is cached and sent with the
    /// `hello` in the handshake each driver connection performs.
    static ref BASE_CLIENT_METADATA: ClientMetadata = ClientMetadata {
        application: None,
        driver: DriverMetadata {
            name: "mongolite".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        },
        os: OsMetadata {
            os_type: std::env::consts::OS.into(),
            name: Some(std::env::consts::OS.into()),
            architecture: std::env::consts::ARCH.into(),
            version: None,
        },
        platform: format!("rust {}", rustc_version()),
    };
}

fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

#[derive(Clone, Debug)]
struct ClientMetadata {
    application: Option<AppMetadata>,
    driver: DriverMetadata,
    os: OsMetadata,
    platform: String,
}

#[derive(Clone, Debug)]
struct AppMetadata {
    name: String,
}

#[derive(Clone, Debug)]
struct DriverMetadata {
    name: String,
    version: String,
}

#[derive(Clone, Debug)]
struct OsMetadata {
    os_type: String,
    name: Option<String>,
    architecture: String,
    version: Option<String>,
}

impl From<&ClientMetadata> for Document {
    fn from(metadata: &ClientMetadata) -> Self {
        let mut metadata_doc = Document::new();

        if let Some(application) = &metadata.application {
            metadata_doc.insert("application", doc! { "name": application.name.as_str() });
        }

        metadata_doc.insert(
            "driver",
            doc! {
                "name": metadata.driver.name.as_str(),
                "version": metadata.driver.version.as_str(),
            },
        );

        let mut os_doc = doc! { "type": metadata.os.os_type.as_str() };
        if let Some(name) = &metadata.os.name {
            os_doc.insert("name", name.as_str());
        }
        os_doc.insert("architecture", metadata.os.architecture.as_str());
        if let Some(version) = &metadata.os.version {
            os_doc.insert("version", version.as_str());
        }
        metadata_doc.insert("os", os_doc);

        metadata_doc.insert("platform", metadata.platform.as_str());

        metadata_doc
    }
}

/// The options needed to assemble a handshake command.
#[derive(Clone, Debug)]
pub(crate) struct HandshakerOptions {
    /// The application name to report to the server.
    pub(crate) app_name: Option<String>,

    /// The compressors to advertise; the server picks the first it also supports.
    pub(crate) compressors: Vec<String>,

    /// Whether the client is configured against a load balancer.
    pub(crate) load_balanced: bool,
}

/// Contains the logic needed to handshake a connection.
#[derive(Clone, Debug)]
pub(crate) struct Handshaker {
    /// The hello command to send when the handshake starts, with all of the metadata.
    command: crate::cmap::Command,

    compressors: Vec<String>,
}

impl Handshaker {
    /// Creates a new Handshaker.
    pub(crate) fn new(options: HandshakerOptions) -> Self {
        let mut metadata = BASE_CLIENT_METADATA.clone();
        if let Some(app_name) = options.app_name {
            metadata.application = Some(AppMetadata { name: app_name });
        }

        let mut command = hello_command(options.load_balanced.then_some(true), None, None);
        command.body.insert("client", Document::from(&metadata));

        if !options.compressors.is_empty() {
            command.body.insert(
                "compression",
                options
                    .compressors
                    .iter()
                    .map(|name| Bson::String(name.clone()))
                    .collect::<Vec<_>>(),
            );
        }

        if options.load_balanced {
            command.body.insert("loadBalanced", true);
        }

        Self {
            command,
            compressors: options.compressors,
        }
    }

    /// Handshakes the given connection, caching the resulting stream description on it.
    pub(crate) async fn handshake(&self, conn: &mut Connection) -> Result<HelloReply> {
        let response = conn.send_command(self.command.clone(), None).await?;
        let reply = response.into_hello_reply(conn.address().clone())?;
        conn.stream_description = Some(StreamDescription::from_hello_reply(
            &reply,
            &self.compressors,
        ));
        Ok(reply)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn metadata_document_shape() {
        let handshaker = Handshaker::new(HandshakerOptions {
            app_name: Some("tests".to_string()),
            compressors: vec!["zstd".to_string(), "zlib".to_string()],
            load_balanced: false,
        });

        let client_doc = handshaker.command.body.get_document("client").unwrap();
        assert_eq!(
            client_doc.get_document("application").unwrap().get_str("name"),
            Some("tests")
        );
        let driver = client_doc.get_document("driver").unwrap();
        assert_eq!(driver.get_str("name"), Some("mongolite"));
        assert!(driver.get_str("version").is_some());
        let os = client_doc.get_document("os").unwrap();
        assert!(os.get_str("type").is_some());
        assert!(os.get_str("architecture").is_some());

        let compression = handshaker.command.body.get_array("compression").unwrap();
        assert_eq!(compression.len(), 2);
    }
}
