//! The slice of the IRC client protocol the bot speaks.
//!
//! Everything here is synchronous: [`Session`] turns one inbound line into
//! the lines to write back, the async connection code only moves bytes.

const RPL_WELCOME: &str = "001";
const ERR_NICKNAMEINUSE: &str = "433";
const NICKSERV: &str = "NickServ";

/// A parsed inbound line. Tags are not requested, so none are parsed.
#[derive(Debug, PartialEq, Eq)]
pub struct Message<'a> {
    pub prefix: Option<&'a str>,
    pub command: &'a str,
    pub params: Vec<&'a str>,
}

impl<'a> Message<'a> {
    pub fn parse(line: &'a str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        let prefix = match rest.strip_prefix(':') {
            Some(stripped) => {
                let (prefix, tail) = stripped.split_once(' ')?;
                rest = tail;
                Some(prefix)
            }
            None => None,
        };

        let rest = rest.trim_start_matches(' ');
        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, tail)) => (command, tail),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing);
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    params.push(param);
                    rest = tail;
                }
                None => {
                    params.push(rest);
                    break;
                }
            }
        }

        Some(Self {
            prefix,
            command,
            params,
        })
    }
}

/// What the connection has to do after one inbound line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Response {
    pub replies: Vec<String>,
    /// Registration finished (`001`).
    pub welcomed: bool,
    /// Send [`Session::reclaim_nick`] after a short pause.
    pub reclaim_nick: bool,
    /// The server closed the link with `ERROR`.
    pub error: Option<String>,
}

/// Per-connection nick bookkeeping.
#[derive(Debug, Clone)]
pub struct Session {
    nick: String,
    password: Option<String>,
    current_nick: String,
    recovering: bool,
}

impl Session {
    pub fn new(nick: impl Into<String>, password: Option<String>) -> Self {
        let nick = nick.into();
        Self {
            current_nick: nick.clone(),
            nick,
            password,
            recovering: false,
        }
    }

    pub fn current_nick(&self) -> &str {
        &self.current_nick
    }

    /// Lines opening the connection.
    pub fn registration(&self, server_password: Option<&str>) -> Vec<String> {
        let mut lines = Vec::with_capacity(3);
        if let Some(pass) = server_password {
            lines.push(format!("PASS {pass}"));
        }
        lines.push(format!("NICK {}", self.nick));
        lines.push(format!("USER {0} 0 * :{0}", self.nick));
        lines
    }

    pub fn respond(&mut self, line: &str) -> Response {
        let mut response = Response::default();
        let Some(message) = Message::parse(line) else {
            return response;
        };

        match message.command {
            "PING" => {
                let token = message.params.first().copied().unwrap_or_default();
                response.replies.push(format!("PONG :{token}"));
            }
            RPL_WELCOME => {
                tracing::info!(nick = %self.current_nick, "Identifying with IRC server");
                response.replies.extend(self.identify());
                response.welcomed = true;
            }
            ERR_NICKNAMEINUSE => {
                if self.recovering {
                    tracing::warn!(nick = %self.current_nick, "Nick still in use, keeping fallback");
                    self.recovering = false;
                } else {
                    tracing::info!(nick = %self.nick, "Nick previously in use, recovering");
                    self.recovering = true;
                    self.current_nick = format!("{}_", self.nick);
                    response.replies.push(format!("NICK {}", self.current_nick));
                    response.replies.extend(self.identify());
                    if let Some(pass) = &self.password {
                        response
                            .replies
                            .push(privmsg(NICKSERV, &format!("ghost {} {pass}", self.nick)));
                        response
                            .replies
                            .push(privmsg(NICKSERV, &format!("release {} {pass}", self.nick)));
                    }
                    response.reclaim_nick = true;
                }
            }
            "NICK" => {
                // our own nick change confirmed
                let old = message
                    .prefix
                    .and_then(|prefix| prefix.split('!').next());
                if old != Some(self.current_nick.as_str()) {
                    return response;
                }
                if let Some(new) = message.params.first() {
                    self.current_nick = (*new).to_string();
                    if self.current_nick == self.nick {
                        self.recovering = false;
                        tracing::info!(nick = %self.nick, "Nick previously in use, recovered");
                    }
                }
            }
            "ERROR" => {
                let reason = message.params.first().copied().unwrap_or_default();
                response.error = Some(reason.to_string());
            }
            _ => {}
        }

        response
    }

    /// Line asking for the configured nick back.
    pub fn reclaim_nick(&self) -> String {
        format!("NICK {}", self.nick)
    }

    fn identify(&self) -> Option<String> {
        self.password
            .as_ref()
            .map(|pass| privmsg(NICKSERV, &format!("identify {pass}")))
    }
}

pub fn join(channel: &str) -> String {
    format!("JOIN {channel}")
}

pub fn part(channel: &str) -> String {
    format!("PART {channel}")
}

/// A PRIVMSG line. Embedded line breaks would end the command early, so they
/// are folded into spaces.
pub fn privmsg(target: &str, text: &str) -> String {
    let text: String = text
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    format!("PRIVMSG {target} :{text}")
}
