//! Channel data and membership.

use crate::user::Uid;
use crate::util;
use selkie_tokens::{mode, rpl, MessageBuffer};
use std::collections::{HashMap, HashSet};

/// Reply code used when a mode change cannot be applied.
pub type Reply = &'static str;

/// Modes applied to members on a per-channel basis.
///
/// <https://tools.ietf.org/html/rfc2811.html#section-4.1>
#[derive(Clone, Copy, Default)]
pub struct MemberModes {
    pub operator: bool,
    pub halfop: bool,
    pub voice: bool,
}

impl MemberModes {
    pub fn symbol(&self) -> Option<char> {
        if self.operator {
            Some('@')
        } else if self.halfop {
            Some('%')
        } else if self.voice {
            Some('+')
        } else {
            None
        }
    }

    pub fn at_least_halfop(&self) -> bool {
        self.operator || self.halfop
    }

    pub fn can_talk_when_moderated(&self) -> bool {
        self.operator || self.halfop || self.voice
    }
}

/// The topic, with its provenance.
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: u64,
}

/// Channel data.
pub struct Channel {
    /// The name as first seen, for display; the map key is the folded form.
    pub name: String,

    /// When the channel was created.
    pub created_at: u64,

    /// Set of channel members and their channel modes.
    pub members: HashMap<Uid, MemberModes>,

    /// Users invited via INVITE.
    pub invites: HashSet<Uid>,

    pub topic: Option<Topic>,

    pub user_limit: Option<usize>,
    pub key: Option<String>,

    // Ordered mask lists; see RFC 2811 section 4.3.
    pub ban_masks: Vec<String>,
    pub exception_masks: Vec<String>,
    pub invitation_masks: Vec<String>,

    // Simple modes; see RFC 2811 section 4.2.
    pub invite_only: bool,
    pub moderated: bool,
    pub no_privmsg_from_outside: bool,
    pub secret: bool,
    pub topic_restricted: bool,
    /// The channel survives its last member leaving.
    pub permanent: bool,
}

impl Channel {
    /// Creates a channel with the given modes set.
    pub fn new(name: &str, modes: &str) -> Self {
        let mut channel = Self {
            name: name.to_owned(),
            created_at: util::time(),
            members: HashMap::new(),
            invites: HashSet::new(),
            topic: None,
            user_limit: None,
            key: None,
            ban_masks: Vec::new(),
            exception_masks: Vec::new(),
            invitation_masks: Vec::new(),
            invite_only: false,
            moderated: false,
            no_privmsg_from_outside: false,
            secret: false,
            topic_restricted: false,
            permanent: false,
        };
        for change in mode::simple_channel_query(modes).filter_map(Result::ok) {
            let _ = channel.apply_mode_change(change, |_| None);
        }
        channel
    }

    /// Adds a member.  The first member becomes channel operator.
    pub fn add_member(&mut self, uid: Uid) {
        let modes = MemberModes {
            operator: self.members.is_empty(),
            ..MemberModes::default()
        };
        self.members.insert(uid, modes);
        self.invites.remove(&uid);
    }

    /// Removes a member; returns whether the channel should be dropped.
    pub fn remove_member(&mut self, uid: Uid) -> bool {
        self.members.remove(&uid);
        self.members.is_empty() && !self.permanent
    }

    pub fn list_entry(&self, msg: MessageBuffer<'_>) {
        msg.param(&self.members.len().to_string())
            .trailing_param(self.topic.as_ref().map_or("", |t| t.text.as_str()));
    }

    /// Whether a mask in the ban list covers `full_name`, with no exception
    /// or invitation mask overriding it.
    pub fn is_banned(&self, full_name: &str) -> bool {
        self.ban_masks.iter().any(|m| util::match_glob(m, full_name))
            && !self.exception_masks.iter().any(|m| util::match_glob(m, full_name))
            && !self.invitation_masks.iter().any(|m| util::match_glob(m, full_name))
    }

    pub fn is_invited(&self, uid: Uid, full_name: &str) -> bool {
        !self.invite_only
            || self.invites.contains(&uid)
            || self.invitation_masks.iter().any(|m| util::match_glob(m, full_name))
    }

    pub fn can_talk(&self, uid: Uid) -> bool {
        if self.moderated {
            self.members
                .get(&uid)
                .map_or(false, MemberModes::can_talk_when_moderated)
        } else {
            !self.no_privmsg_from_outside || self.members.contains_key(&uid)
        }
    }

    /// Appends the channel's mode string (RPL_CHANNELMODEIS).
    ///
    /// Parameter values are only revealed when `full_info` is set, i.e. when
    /// the asker is on the channel.
    pub fn write_modes(&self, mut out: MessageBuffer<'_>, full_info: bool) {
        let modes = out.raw_param();
        modes.push('+');
        if self.invite_only { modes.push('i'); }
        if self.moderated { modes.push('m'); }
        if self.no_privmsg_from_outside { modes.push('n'); }
        if self.secret { modes.push('s'); }
        if self.topic_restricted { modes.push('t'); }
        if self.permanent { modes.push('P'); }
        if self.user_limit.is_some() { modes.push('l'); }
        if self.key.is_some() { modes.push('k'); }

        if full_info {
            if let Some(user_limit) = self.user_limit {
                out = out.param(&user_limit.to_string());
            }
            if let Some(ref key) = self.key {
                out.param(key);
            }
        }
    }

    /// Applies one mode change, returning whether the channel state changed.
    ///
    /// Member-status changes resolve their nick parameter through `uid_of`;
    /// an unknown nick yields `ERR_USERNOTINCHANNEL`.
    pub fn apply_mode_change<F>(
        &mut self,
        change: mode::ChannelChange<'_>,
        uid_of: F,
    ) -> Result<bool, Reply>
    where
        F: Fn(&str) -> Option<Uid>,
    {
        use mode::ChannelChange::*;

        fn toggle(slot: &mut bool, value: bool) -> bool {
            let applied = *slot != value;
            *slot = value;
            applied
        }

        fn list_change(list: &mut Vec<String>, value: bool, mask: &str) -> bool {
            let map = selkie_unicase::national_map();
            let present = list.iter().position(|m| map.eq(m, mask));
            match (value, present) {
                (true, None) => {
                    list.push(mask.to_owned());
                    true
                }
                (false, Some(at)) => {
                    list.remove(at);
                    true
                }
                _ => false,
            }
        }

        let applied = match change {
            InviteOnly(value) => toggle(&mut self.invite_only, value),
            Moderated(value) => toggle(&mut self.moderated, value),
            NoPrivMsgFromOutside(value) => toggle(&mut self.no_privmsg_from_outside, value),
            Secret(value) => toggle(&mut self.secret, value),
            TopicRestricted(value) => toggle(&mut self.topic_restricted, value),
            Permanent(value) => toggle(&mut self.permanent, value),
            Key(value, key) => {
                if value {
                    if self.key.is_some() {
                        return Err(rpl::ERR_KEYSET);
                    }
                    self.key = Some(key.to_owned());
                    true
                } else if self.key.as_deref().map_or(false, |k| k == key || key == "*") {
                    self.key = None;
                    true
                } else {
                    false
                }
            }
            UserLimit(Some(s)) => match s.parse() {
                Ok(limit) => {
                    let applied = self.user_limit != Some(limit);
                    self.user_limit = Some(limit);
                    applied
                }
                Err(_) => false,
            },
            UserLimit(None) => {
                let applied = self.user_limit.is_some();
                self.user_limit = None;
                applied
            }
            ChangeBan(value, mask) => list_change(&mut self.ban_masks, value, mask),
            ChangeException(value, mask) => list_change(&mut self.exception_masks, value, mask),
            ChangeInvitation(value, mask) => list_change(&mut self.invitation_masks, value, mask),
            ChangeOperator(value, nick) | ChangeHalfop(value, nick) | ChangeVoice(value, nick) => {
                let uid = uid_of(nick).ok_or(rpl::ERR_USERNOTINCHANNEL)?;
                let member = self
                    .members
                    .get_mut(&uid)
                    .ok_or(rpl::ERR_USERNOTINCHANNEL)?;
                let slot = match change {
                    ChangeOperator(..) => &mut member.operator,
                    ChangeHalfop(..) => &mut member.halfop,
                    _ => &mut member.voice,
                };
                toggle(slot, value)
            }
            GetBans | GetExceptions | GetInvitations => false,
        };
        Ok(applied)
    }

    /// The channel-status symbol used in NAMES replies.
    pub fn symbol(&self) -> &'static str {
        if self.secret {
            "@"
        } else {
            "="
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::Uid;

    fn uid(n: u8) -> Uid {
        let mut bytes = *b"00AAAAAAA";
        bytes[8] = b'A' + n;
        Uid::new(bytes)
    }

    #[test]
    fn test_first_member_is_operator() {
        let mut chan = Channel::new("#test", "+nt");
        assert!(chan.no_privmsg_from_outside);
        assert!(chan.topic_restricted);

        chan.add_member(uid(0));
        chan.add_member(uid(1));
        assert!(chan.members[&uid(0)].operator);
        assert!(!chan.members[&uid(1)].operator);
    }

    #[test]
    fn test_empty_channel_drops_unless_permanent() {
        let mut chan = Channel::new("#test", "");
        chan.add_member(uid(0));
        assert!(chan.remove_member(uid(0)));

        let mut chan = Channel::new("#keep", "+P");
        chan.add_member(uid(0));
        assert!(!chan.remove_member(uid(0)));
    }

    #[test]
    fn test_ban_with_exception() {
        let mut chan = Channel::new("#test", "");
        let ok = chan
            .apply_mode_change(mode::ChannelChange::ChangeBan(true, "*!*@evil.example"), |_| None)
            .unwrap();
        assert!(ok);
        assert!(chan.is_banned("eve!eve@evil.example"));
        assert!(!chan.is_banned("bob!bob@good.example"));

        chan.apply_mode_change(
            mode::ChannelChange::ChangeException(true, "eve!*@*"),
            |_| None,
        )
        .unwrap();
        assert!(!chan.is_banned("eve!eve@evil.example"));
    }

    #[test]
    fn test_member_status_change() {
        let mut chan = Channel::new("#test", "");
        chan.add_member(uid(0));
        chan.add_member(uid(1));

        let applied = chan
            .apply_mode_change(mode::ChannelChange::ChangeVoice(true, "bob"), |nick| {
                (nick == "bob").then(|| uid(1))
            })
            .unwrap();
        assert!(applied);
        assert!(chan.members[&uid(1)].voice);

        let missing = chan.apply_mode_change(mode::ChannelChange::ChangeOperator(true, "eve"), |_| None);
        assert_eq!(missing, Err(rpl::ERR_USERNOTINCHANNEL));
    }
}
