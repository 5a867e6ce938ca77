//! Mode parsing, validation and stacking.

use std::collections::VecDeque;
use std::str;

/// User modes supported by the server.  Advertised in welcome messages.
pub const USER_MODES: &str = "aiosw";

/// Channel modes that have no parameters.  Advertised in welcome messages.
pub const SIMPLE_CHAN_MODES: &str = "imnstP";

/// Channel modes that require a parameter.  Advertised in welcome messages.
pub const EXTENDED_CHAN_MODES: &str = "beIkl";

/// CHANMODES feature advertised in RPL_ISUPPORT.
pub const CHANMODES: &str = "CHANMODES=beI,k,l,imnstP";

/// The maximum number of parameter-bearing mode changes per emitted MODE
/// line.  Advertised as MODES in RPL_ISUPPORT.
pub const MAX_MODES: usize = 20;

/// Iterator over the modes of a string.
struct SimpleQuery<'a> {
    modes: str::Chars<'a>,
    value: bool,
}

impl<'a> SimpleQuery<'a> {
    pub fn new(modes: &'a str) -> Self {
        Self {
            modes: modes.chars(),
            value: true,
        }
    }
}

impl Iterator for SimpleQuery<'_> {
    type Item = (bool, char);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.modes.next()? {
                '+' => {
                    self.value = true;
                }
                '-' => {
                    self.value = false;
                }
                c => {
                    return Some((self.value, c));
                }
            }
        }
    }
}

/// *_query related errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// One of the modes in the query is unknown.
    Unknown(char, bool),

    /// A mode is missing its required parameter.
    MissingParam(char, bool),

    /// This mode exists, but cannot be changed with the MODE command.
    Unchangeable(char, bool),
}

/// Alias to std's Result using this module's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Item of a user mode query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserChange {
    Invisible(bool),
    ServerNotices(bool),
    Wallops(bool),
    DeOperator,
}

impl UserChange {
    /// Whether this change is enabling or disabling a mode.
    pub fn value(self) -> bool {
        match self {
            Self::Invisible(v) | Self::ServerNotices(v) | Self::Wallops(v) => v,
            Self::DeOperator => false,
        }
    }

    /// The letter of this mode change.
    pub fn symbol(self) -> char {
        match self {
            Self::Invisible(_) => 'i',
            Self::ServerNotices(_) => 's',
            Self::Wallops(_) => 'w',
            Self::DeOperator => 'o',
        }
    }
}

/// An iterator over the changes of a user MODE query.
///
/// # Example
///
/// ```rust
/// # use selkie_tokens::mode::{self, Error, UserChange};
/// let mut query = mode::user_query("+iw-oX");
///
/// assert_eq!(query.next(), Some(Ok(UserChange::Invisible(true))));
/// assert_eq!(query.next(), Some(Ok(UserChange::Wallops(true))));
/// assert_eq!(query.next(), Some(Ok(UserChange::DeOperator)));
/// assert_eq!(query.next(), Some(Err(Error::Unknown('X', false))));
/// assert_eq!(query.next(), None);
/// ```
pub fn user_query(modes: &str) -> impl Iterator<Item = Result<UserChange>> + '_ {
    SimpleQuery::new(modes).map(|(value, mode)| match mode {
        'i' => Ok(UserChange::Invisible(value)),
        's' => Ok(UserChange::ServerNotices(value)),
        'w' => Ok(UserChange::Wallops(value)),
        // Oper status is only granted through OPER.
        'o' if !value => Ok(UserChange::DeOperator),
        other if USER_MODES.contains(other) => Err(Error::Unchangeable(other, value)),
        other => Err(Error::Unknown(other, value)),
    })
}

/// Item of a channel mode query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelChange<'a> {
    InviteOnly(bool),
    Moderated(bool),
    NoPrivMsgFromOutside(bool),
    Secret(bool),
    TopicRestricted(bool),
    Permanent(bool),
    Key(bool, &'a str),
    UserLimit(Option<&'a str>),
    GetBans,
    GetExceptions,
    GetInvitations,
    ChangeBan(bool, &'a str),
    ChangeException(bool, &'a str),
    ChangeInvitation(bool, &'a str),
    ChangeOperator(bool, &'a str),
    ChangeHalfop(bool, &'a str),
    ChangeVoice(bool, &'a str),
}

impl ChannelChange<'_> {
    /// Whether this change is enabling or disabling a mode.
    pub fn value(&self) -> bool {
        use ChannelChange::*;
        match self {
            InviteOnly(v)
            | Moderated(v)
            | NoPrivMsgFromOutside(v)
            | Secret(v)
            | TopicRestricted(v)
            | Permanent(v)
            | Key(v, _)
            | ChangeBan(v, _)
            | ChangeException(v, _)
            | ChangeInvitation(v, _)
            | ChangeOperator(v, _)
            | ChangeHalfop(v, _)
            | ChangeVoice(v, _) => *v,
            UserLimit(l) => l.is_some(),
            _ => false,
        }
    }

    /// The letter of this mode change.
    pub fn symbol(&self) -> char {
        use ChannelChange::*;
        match self {
            InviteOnly(_) => 'i',
            Moderated(_) => 'm',
            NoPrivMsgFromOutside(_) => 'n',
            Secret(_) => 's',
            TopicRestricted(_) => 't',
            Permanent(_) => 'P',
            Key(_, _) => 'k',
            UserLimit(_) => 'l',
            ChangeBan(_, _) | GetBans => 'b',
            ChangeException(_, _) | GetExceptions => 'e',
            ChangeInvitation(_, _) | GetInvitations => 'I',
            ChangeOperator(_, _) => 'o',
            ChangeHalfop(_, _) => 'h',
            ChangeVoice(_, _) => 'v',
        }
    }

    /// The parameter of this mode change.
    pub fn param(&self) -> Option<&str> {
        use ChannelChange::*;
        match self {
            Key(_, p)
            | ChangeBan(_, p)
            | ChangeException(_, p)
            | ChangeInvitation(_, p)
            | ChangeOperator(_, p)
            | ChangeHalfop(_, p)
            | ChangeVoice(_, p) => Some(p),
            UserLimit(l) => *l,
            _ => None,
        }
    }
}

/// An iterator over the changes of a channel MODE query.
///
/// # Example
///
/// ```rust
/// # use selkie_tokens::mode::{self, Error, ChannelChange};
/// let mut query = mode::channel_query("-olX+kmv", &["admin", "secret_key"]);
///
/// assert_eq!(query.next(), Some(Ok(ChannelChange::ChangeOperator(false, "admin"))));
/// assert_eq!(query.next(), Some(Ok(ChannelChange::UserLimit(None))));
/// assert_eq!(query.next(), Some(Err(Error::Unknown('X', false))));
/// assert_eq!(query.next(), Some(Ok(ChannelChange::Key(true, "secret_key"))));
/// assert_eq!(query.next(), Some(Ok(ChannelChange::Moderated(true))));
/// assert_eq!(query.next(), Some(Err(Error::MissingParam('v', true))));
/// assert_eq!(query.next(), None);
/// ```
pub fn channel_query<'a, I, S>(
    modes: &'a str,
    params: I,
) -> impl Iterator<Item = Result<ChannelChange<'a>>>
where
    I: IntoIterator<Item = &'a S> + 'a,
    S: AsRef<str> + 'a,
{
    let mut params = params
        .into_iter()
        .map(|p| p.as_ref())
        .filter(|p| !p.is_empty());
    SimpleQuery::new(modes).map(move |(value, mode)| {
        use ChannelChange::*;
        match mode {
            'i' => Ok(InviteOnly(value)),
            'm' => Ok(Moderated(value)),
            'n' => Ok(NoPrivMsgFromOutside(value)),
            's' => Ok(Secret(value)),
            't' => Ok(TopicRestricted(value)),
            'P' => Ok(Permanent(value)),
            'k' => {
                if let Some(param) = params.next() {
                    Ok(Key(value, param))
                } else if !value {
                    // Accept a bare "MODE -k", several networks do.
                    Ok(Key(false, "*"))
                } else {
                    Err(Error::MissingParam('k', value))
                }
            }
            'l' => {
                if value {
                    if let Some(param) = params.next() {
                        Ok(UserLimit(Some(param)))
                    } else {
                        Err(Error::MissingParam('l', value))
                    }
                } else {
                    Ok(UserLimit(None))
                }
            }
            'b' => {
                if let Some(param) = params.next() {
                    Ok(ChangeBan(value, param))
                } else {
                    Ok(GetBans)
                }
            }
            'e' => {
                if let Some(param) = params.next() {
                    Ok(ChangeException(value, param))
                } else {
                    Ok(GetExceptions)
                }
            }
            'I' => {
                if let Some(param) = params.next() {
                    Ok(ChangeInvitation(value, param))
                } else {
                    Ok(GetInvitations)
                }
            }
            'o' => {
                if let Some(param) = params.next() {
                    Ok(ChangeOperator(value, param))
                } else {
                    Err(Error::MissingParam('o', value))
                }
            }
            'h' => {
                if let Some(param) = params.next() {
                    Ok(ChangeHalfop(value, param))
                } else {
                    Err(Error::MissingParam('h', value))
                }
            }
            'v' => {
                if let Some(param) = params.next() {
                    Ok(ChangeVoice(value, param))
                } else {
                    Err(Error::MissingParam('v', value))
                }
            }
            other => Err(Error::Unknown(other, value)),
        }
    })
}

/// Same as `channel_query`, but with no mode parameters.
pub fn simple_channel_query(modes: &str) -> impl Iterator<Item = Result<ChannelChange<'_>>> {
    channel_query::<_, String>(modes, &[])
}

/// Whether the given string is a valid channel MODE query.
///
/// **Note:** the string must not contain spaces nor mode params.
///
/// # Example
///
/// ```rust
/// # use selkie_tokens::mode;
/// assert!(mode::is_channel_mode_string("+nt"));
/// assert!(!mode::is_channel_mode_string("+X"));
/// ```
pub fn is_channel_mode_string(s: &str) -> bool {
    simple_channel_query(s).all(|r| r.is_ok())
}

struct StackedMode {
    value: bool,
    letter: char,
    param: Option<String>,
}

/// Collects applied mode changes and reproduces them as MODE lines bounded
/// by a maximum number of parameters and a maximum letter-payload size.
///
/// Changes are emitted in push order, with consecutive same-sign letters
/// coalesced under one `+`/`-`.
///
/// # Example
///
/// ```rust
/// # use selkie_tokens::mode::{ModeStack, MAX_MODES};
/// let mut stack = ModeStack::new();
/// stack.push(true, 'o', Some("alice"));
/// stack.push(false, 'v', Some("bob"));
/// stack.push(true, 'b', Some("*!*@evil.example"));
///
/// let line = stack.drain(MAX_MODES, 360).unwrap();
/// assert_eq!(line, "+o-v+b alice bob *!*@evil.example");
/// assert!(stack.drain(MAX_MODES, 360).is_none());
/// ```
#[derive(Default)]
pub struct ModeStack {
    sequence: VecDeque<StackedMode>,
}

impl ModeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a mode letter, its sign and its optional parameter onto the
    /// stack.
    ///
    /// No checking is performed as to whether this mode actually requires a
    /// parameter; stacked sequences are reproduced as given.
    pub fn push(&mut self, value: bool, letter: char, param: Option<&str>) {
        self.sequence.push_back(StackedMode {
            value,
            letter,
            param: param.map(str::to_owned),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Pops stacked changes and formats them as one MODE line payload
    /// (letters first, then parameters, without the target).
    ///
    /// Each call emits at most `max_modes` parameter-bearing changes and at
    /// most `max_line` bytes of sign-and-letter payload.  Call in a loop
    /// until it returns `None`.
    pub fn drain(&mut self, max_modes: usize, max_line: usize) -> Option<String> {
        if self.sequence.is_empty() {
            return None;
        }

        let mut letters = String::new();
        let mut params = String::new();
        let mut with_param = 0;
        let mut sign = None;

        while let Some(entry) = self.sequence.front() {
            if entry.param.is_some() && with_param == max_modes {
                break;
            }
            // A sign flip costs up to two bytes of payload.
            if letters.len() + 2 > max_line {
                break;
            }
            let entry = self.sequence.pop_front().unwrap();
            if sign != Some(entry.value) {
                letters.push(if entry.value { '+' } else { '-' });
                sign = Some(entry.value);
            }
            letters.push(entry.letter);
            if let Some(param) = entry.param {
                params.push(' ');
                params.push_str(&param);
                with_param += 1;
            }
        }

        if letters.is_empty() {
            return None;
        }
        letters.push_str(&params);
        Some(letters)
    }
}

#[allow(clippy::cognitive_complexity)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_query() {
        let mut q = SimpleQuery::new("+ab+C++D+-+E--fg+-h");
        assert_eq!(q.next(), Some((true, 'a')));
        assert_eq!(q.next(), Some((true, 'b')));
        assert_eq!(q.next(), Some((true, 'C')));
        assert_eq!(q.next(), Some((true, 'D')));
        assert_eq!(q.next(), Some((true, 'E')));
        assert_eq!(q.next(), Some((false, 'f')));
        assert_eq!(q.next(), Some((false, 'g')));
        assert_eq!(q.next(), Some((false, 'h')));
        assert_eq!(q.next(), None);

        let mut q = SimpleQuery::new("a");
        assert_eq!(q.next(), Some((true, 'a')));
        assert_eq!(q.next(), None);

        let mut q = SimpleQuery::new("");
        assert_eq!(q.next(), None);
    }

    #[test]
    fn test_chanmode_key() {
        let mut q = channel_query::<_, String>("+k", &[]);
        assert_eq!(q.next(), Some(Err(Error::MissingParam('k', true))));
        assert_eq!(q.next(), None);

        let mut q = channel_query("+k", &["beer"]);
        assert_eq!(q.next(), Some(Ok(ChannelChange::Key(true, "beer"))));
        assert_eq!(q.next(), None);

        let mut q = channel_query::<_, String>("-k", &[]);
        assert_eq!(q.next(), Some(Ok(ChannelChange::Key(false, "*"))));
        assert_eq!(q.next(), None);

        let mut q = channel_query("+kb", &["beer"]);
        assert_eq!(q.next(), Some(Ok(ChannelChange::Key(true, "beer"))));
        assert_eq!(q.next(), Some(Ok(ChannelChange::GetBans)));
        assert_eq!(q.next(), None);

        let mut q = channel_query("+bk", &["beer"]);
        assert_eq!(q.next(), Some(Ok(ChannelChange::ChangeBan(true, "beer"))));
        assert_eq!(q.next(), Some(Err(Error::MissingParam('k', true))));
        assert_eq!(q.next(), None);

        let mut q = channel_query("+kb", &["beer", "wine"]);
        assert_eq!(q.next(), Some(Ok(ChannelChange::Key(true, "beer"))));
        assert_eq!(q.next(), Some(Ok(ChannelChange::ChangeBan(true, "wine"))));
        assert_eq!(q.next(), None);
    }

    #[test]
    fn test_halfop_and_permanent() {
        let mut q = channel_query("+hP", &["helper"]);
        assert_eq!(q.next(), Some(Ok(ChannelChange::ChangeHalfop(true, "helper"))));
        assert_eq!(q.next(), Some(Ok(ChannelChange::Permanent(true))));
        assert_eq!(q.next(), None);
    }

    #[test]
    fn test_stack_order_and_coalescing() {
        let mut stack = ModeStack::new();
        stack.push(true, 'n', None);
        stack.push(true, 't', None);
        stack.push(false, 'v', Some("bob"));
        stack.push(false, 'm', None);
        stack.push(true, 'o', Some("alice"));

        let line = stack.drain(MAX_MODES, 360).unwrap();
        assert_eq!(line, "+nt-vm+o bob alice");
        assert!(stack.is_empty());
    }

    #[test]
    fn test_stack_bounds() {
        let mut stack = ModeStack::new();
        for i in 0..50 {
            let nick = format!("user{}", i);
            stack.push(true, 'v', Some(&nick));
        }

        let mut emitted = Vec::new();
        while let Some(line) = stack.drain(MAX_MODES, 360) {
            emitted.push(line);
        }
        assert_eq!(emitted.len(), 3);
        for line in &emitted {
            let mut words = line.split(' ');
            let letters = words.next().unwrap();
            let params = words.count();
            assert!(params <= MAX_MODES);
            assert!(letters.len() <= 360);
            // One letter per parameter in this test.
            assert_eq!(letters.chars().filter(|c| *c == 'v').count(), params);
        }
        // Order is preserved across lines.
        assert!(emitted[0].contains("user0"));
        assert!(emitted[2].contains("user49"));
    }

    #[test]
    fn test_stack_line_size_bound() {
        let mut stack = ModeStack::new();
        for _ in 0..30 {
            stack.push(true, 'n', None);
            stack.push(false, 'm', None);
        }
        while let Some(line) = stack.drain(MAX_MODES, 16) {
            let letters = line.split(' ').next().unwrap();
            assert!(letters.len() <= 16);
        }
    }
}
