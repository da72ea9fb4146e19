use log::debug;
use mailin_embedded::{response, Handler, Response, Server, SslConfig};
use std::net::{IpAddr, TcpListener};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Fake SMTP relay for one test. Each call to [`FakeSmtpServer::start`] listens on its own
/// ephemeral port, so tests using different servers may run concurrently.
#[derive(Clone, Default)]
pub struct FakeSmtpServer {
    reject_sessions: bool,
}

/// Handle on a fake relay which is accepting connections on a background thread.
pub struct RunningFakeSmtpServer {
    url: String,
    mails: UnboundedReceiver<String>,
}

#[derive(Clone)]
struct RecordingHandler {
    reject_sessions: bool,
    data: Vec<u8>,
    mails: UnboundedSender<String>,
}

impl Handler for RecordingHandler {
    fn helo(&mut self, _ip: IpAddr, domain: &str) -> Response {
        if self.reject_sessions {
            debug!("Rejecting session from {domain}");
            response::INTERNAL_ERROR
        } else {
            response::OK
        }
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, from: &str) -> Response {
        if self.reject_sessions {
            response::INTERNAL_ERROR
        } else {
            debug!("Accepting mail from {from}");
            response::OK
        }
    }

    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.data.extend(buf);
        Ok(())
    }

    fn data_end(&mut self) -> Response {
        let mail = String::from_utf8_lossy(&self.data).into_owned();
        self.data.clear();
        debug!("Got mail:\n{mail}");
        // The test may already have dropped its handle.
        let _ = self.mails.send(mail);
        response::OK
    }
}

impl FakeSmtpServer {
    /// Makes the relay refuse every session, so that any attempt to send fails.
    pub fn reject_sessions(self) -> Self {
        Self {
            reject_sessions: true,
        }
    }

    pub fn start(self) -> RunningFakeSmtpServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut server = Server::new(RecordingHandler {
            reject_sessions: self.reject_sessions,
            data: Vec::new(),
            mails: sender,
        });
        server
            .with_name("contact.example.com")
            .with_ssl(SslConfig::None)
            .unwrap()
            .with_tcp_listener(listener);
        std::thread::spawn(move || {
            if let Err(error) = server.serve() {
                debug!("Fake SMTP server stopped: {error}");
            }
        });
        RunningFakeSmtpServer {
            url: format!("smtp://{address}"),
            mails: receiver,
        }
    }
}

impl RunningFakeSmtpServer {
    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Full content, headers included, of the next mail the relay accepts.
    pub async fn next_mail(&mut self) -> Option<String> {
        self.mails.recv().await
    }
}
