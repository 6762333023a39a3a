//! IRC implementation of the chat seam.
//!
//! `connect` registers synchronously, then hands the socket to a connection
//! task that answers PINGs and nick collisions on its own and writes the
//! lines queued by [`IrcClient`]. When that task ends the queue closes and
//! the next call reports [`DeliveryError::Disconnected`].

mod codec;
mod protocol;
mod stream;

use async_trait::async_trait;
use codec::IrcLineCodec;
use futures_util::{SinkExt, StreamExt};
use gerritbot_core::ChannelName;
use gerritbot_core::chat::{ChatClient, DeliveryError};
use protocol::Session;
use std::time::Duration;
use stream::IrcStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Port on which TLS is used even without `force_ssl`.
pub const IRC_TLS_PORT: u16 = 6697;

const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(30);
const NICK_RECLAIM_DELAY: Duration = Duration::from_secs(1);
const MAX_LINE_LENGTH: usize = 8192;
const OUTGOING_BUFFER: usize = 64;

type IrcFramed = Framed<IrcStream, IrcLineCodec>;

#[derive(Debug, Clone)]
pub struct IrcParams {
    pub server: String,
    pub port: u16,
    pub tls: bool,
    pub nick: String,
    /// NickServ password.
    pub password: Option<String>,
    pub server_password: Option<String>,
}

struct Connection {
    outgoing: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

pub struct IrcClient {
    params: IrcParams,
    connection: Option<Connection>,
}

impl IrcClient {
    pub fn new(params: IrcParams) -> Self {
        Self {
            params,
            connection: None,
        }
    }

    /// Open the socket and register. Replaces any previous connection.
    pub async fn connect(&mut self) -> Result<(), DeliveryError> {
        self.disconnect();

        let IrcParams {
            server, port, tls, ..
        } = &self.params;
        info!(%server, port, tls, "Connecting to IRC server");
        let stream = IrcStream::connect(server, *port, *tls).await?;
        let mut framed = Framed::new(stream, IrcLineCodec::with_max_len(MAX_LINE_LENGTH));

        let mut session = Session::new(&self.params.nick, self.params.password.clone());
        tokio::time::timeout(
            REGISTRATION_TIMEOUT,
            register(&mut framed, &mut session, self.params.server_password.as_deref()),
        )
        .await
        .map_err(|_| DeliveryError::Timeout)??;
        info!(nick = %session.current_nick(), "Registered with IRC server");

        let (outgoing, outgoing_rx) = mpsc::channel(OUTGOING_BUFFER);
        let task = tokio::spawn(drive(framed, session, outgoing_rx));
        self.connection = Some(Connection { outgoing, task });
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.task.abort();
        }
    }

    async fn queue(&self, line: String) -> Result<(), DeliveryError> {
        let connection = self
            .connection
            .as_ref()
            .ok_or(DeliveryError::Disconnected)?;
        connection
            .outgoing
            .send(line)
            .await
            .map_err(|_| DeliveryError::Disconnected)
    }
}

#[async_trait]
impl ChatClient for IrcClient {
    async fn join(&mut self, channel: &ChannelName) -> Result<(), DeliveryError> {
        self.queue(protocol::join(channel.as_str())).await
    }

    async fn part(&mut self, channel: &ChannelName) -> Result<(), DeliveryError> {
        self.queue(protocol::part(channel.as_str())).await
    }

    async fn send(&mut self, channel: &ChannelName, text: &str) -> Result<(), DeliveryError> {
        self.queue(protocol::privmsg(channel.as_str(), text)).await
    }

    async fn reconnect(&mut self) -> Result<(), DeliveryError> {
        self.connect().await
    }
}

async fn write_all(framed: &mut IrcFramed, lines: Vec<String>) -> Result<(), DeliveryError> {
    for line in lines {
        debug!(%line, "IRC >>");
        framed.send(line).await?;
    }
    Ok(())
}

/// Send the registration lines and wait for the welcome numeric.
async fn register(
    framed: &mut IrcFramed,
    session: &mut Session,
    server_password: Option<&str>,
) -> Result<(), DeliveryError> {
    write_all(framed, session.registration(server_password)).await?;

    while let Some(line) = framed.next().await {
        let line = line?;
        debug!(%line, "IRC <<");
        let response = session.respond(&line);
        if let Some(reason) = response.error {
            return Err(DeliveryError::Rejected(reason));
        }
        write_all(framed, response.replies).await?;
        if response.reclaim_nick {
            tokio::time::sleep(NICK_RECLAIM_DELAY).await;
            write_all(framed, vec![session.reclaim_nick()]).await?;
        }
        if response.welcomed {
            return Ok(());
        }
    }

    Err(DeliveryError::Disconnected)
}

/// Own the registered socket until it fails or the client goes away.
async fn drive(framed: IrcFramed, mut session: Session, mut outgoing: mpsc::Receiver<String>) {
    let (mut sink, mut lines) = framed.split();

    loop {
        tokio::select! {
            line = outgoing.recv() => {
                let Some(line) = line else {
                    debug!("IRC client dropped, closing connection");
                    let _ = sink.send("QUIT".to_string()).await;
                    break;
                };
                debug!(%line, "IRC >>");
                if let Err(e) = sink.send(line).await {
                    error!(error = %e, "Failed to write to IRC server");
                    break;
                }
            }

            line = lines.next() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => {
                        error!(error = %e, "Failed to read from IRC server");
                        break;
                    }
                    None => {
                        warn!("IRC server closed the connection");
                        break;
                    }
                };
                debug!(%line, "IRC <<");

                let response = session.respond(&line);
                if let Some(reason) = response.error {
                    warn!(%reason, "IRC server closed the link");
                    break;
                }
                let mut failed = false;
                for reply in response.replies {
                    if sink.send(reply).await.is_err() {
                        failed = true;
                        break;
                    }
                }
                if !failed && response.reclaim_nick {
                    tokio::time::sleep(NICK_RECLAIM_DELAY).await;
                    failed = sink.send(session.reclaim_nick()).await.is_err();
                }
                if failed {
                    error!("Failed to answer IRC server");
                    break;
                }
            }
        }
    }
}
