//! Handlers for the RFC 2812 client-to-server commands.
//!
//! <https://tools.ietf.org/html/rfc2812.html>

use super::{
    find_channel, find_member, find_nick, CommandContext, HandlerResult as Result,
    MAX_CHANNEL_NAME_LENGTH, MAX_KICK_LENGTH, MAX_NICKNAME_LENGTH, MAX_TOPIC_LENGTH, SERVER_INFO,
};
use crate::channel::{Channel, Topic};
use crate::conn::MessageQueueItem;
use crate::hooks::{Hook, ModResult};
use crate::lines;
use crate::user::RegState;
use crate::util;
use selkie_tokens::{mode, rpl, Buffer, Command};
use selkie_unicase::{u, UniCase};

/// Nicknames start with a letter or one of the RFC specials, continue with
/// those plus digits and `-`.
fn is_valid_nickname(nick: &str) -> bool {
    const SPECIALS: &str = "[]\\`_^{|}";

    let mut chars = nick.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    nick.len() <= MAX_NICKNAME_LENGTH
        && (first.is_ascii_alphabetic() || SPECIALS.contains(first))
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || SPECIALS.contains(c))
}

fn is_valid_channel_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some('#') | Some('&'))
        && name.len() <= MAX_CHANNEL_NAME_LENGTH
        && chars.all(|c| c != ' ' && c != ',' && c != '\x07')
}

fn is_channel_name(name: &str) -> bool {
    name.starts_with('#') || name.starts_with('&')
}

// Command handlers
impl super::State {
    // ADMIN

    pub fn cmd_admin(&mut self, ctx: &mut CommandContext) -> Result {
        ctx.reply(rpl::ADMINME)
            .param(&self.config.server_name)
            .trailing_param(lines::ADMIN_ME);
        ctx.reply(rpl::ADMINLOC1).trailing_param(&self.config.org_location);
        ctx.reply(rpl::ADMINLOC2).trailing_param(&self.config.org_name);
        ctx.reply(rpl::ADMINMAIL).trailing_param(&self.config.org_mail);

        Ok(())
    }

    // AWAY

    pub fn cmd_away(&mut self, ctx: &mut CommandContext, message: &str) -> Result {
        let user = self.users.get_mut(ctx.uid).ok_or(())?;
        if message.is_empty() {
            user.away = None;
            ctx.reply(rpl::UNAWAY).trailing_param(lines::UNAWAY);
        } else {
            user.away = Some(message.to_owned());
            ctx.reply(rpl::NOWAWAY).trailing_param(lines::NOWAWAY);
        }

        Ok(())
    }

    // INFO

    pub fn cmd_info(&mut self, ctx: &mut CommandContext) -> Result {
        for line in SERVER_INFO.lines() {
            ctx.reply(rpl::INFO).trailing_param(line);
        }
        ctx.reply(rpl::ENDOFINFO).trailing_param(lines::END_OF_INFO);

        Ok(())
    }

    // INVITE

    pub fn cmd_invite(&mut self, ctx: &mut CommandContext, nick: &str, channel_name: &str) -> Result {
        let target = find_nick(ctx, &self.users, nick)?;

        if let Some(channel) = self.channels.get(u(channel_name)) {
            let member_modes = find_member(ctx, channel, channel_name)?;
            if channel.invite_only && !member_modes.operator {
                log::debug!("{}:     not operator", ctx.uid);
                ctx.reply(rpl::ERR_CHANOPRIVSNEEDED)
                    .param(channel_name)
                    .trailing_param(lines::CHAN_O_PRIVS_NEEDED);
                return Err(());
            }
            if channel.members.contains_key(&target) {
                log::debug!("{}:     user on channel", ctx.uid);
                ctx.reply(rpl::ERR_USERONCHANNEL)
                    .param(nick)
                    .param(channel_name)
                    .trailing_param(lines::USER_ON_CHANNEL);
                return Err(());
            }
        }

        let invited = match self.channels.get_mut(u(channel_name)) {
            Some(channel) => channel.invites.insert(target),
            None => true,
        };
        if !invited {
            return Err(());
        }

        ctx.reply(rpl::INVITING).param(nick).param(channel_name);

        let full_name = self.users.get(ctx.uid).ok_or(())?.full_name().to_owned();
        let mut invite = Buffer::new();
        invite
            .message(&full_name, Command::Invite)
            .param(nick)
            .param(channel_name);
        self.send(target, MessageQueueItem::from(invite));

        Ok(())
    }

    // JOIN

    pub fn cmd_join(&mut self, ctx: &mut CommandContext, targets: &str, keys: &str) -> Result {
        let keys: Vec<&str> = selkie_tokens::split::tokens(keys, ',', true).collect();
        let mut res = Ok(());
        for (i, target) in targets.split(',').filter(|t| !t.is_empty()).enumerate() {
            let key = keys.get(i).copied().unwrap_or("");
            if self.join_one(ctx, target, key).is_err() {
                res = Err(());
            }
        }
        res
    }

    pub(super) fn join_one(&mut self, ctx: &mut CommandContext, target: &str, key: &str) -> Result {
        if !is_valid_channel_name(target) {
            log::debug!("{}:     invalid channel name", ctx.uid);
            ctx.reply(rpl::ERR_NOSUCHCHANNEL)
                .param(target)
                .trailing_param(lines::NO_SUCH_CHANNEL);
            return Err(());
        }

        let full_name = self.users.get(ctx.uid).ok_or(())?.full_name().to_owned();

        if let Some(channel) = self.channels.get(u(target)) {
            if channel.members.contains_key(&ctx.uid) {
                log::debug!("{}:     already in channel", ctx.uid);
                return Err(());
            }
            if channel.key.as_deref().map_or(false, |ck| ck != key) {
                log::debug!("{}:     bad key", ctx.uid);
                ctx.reply(rpl::ERR_BADCHANKEY)
                    .param(target)
                    .trailing_param(lines::BAD_CHAN_KEY);
                return Err(());
            }
            if channel
                .user_limit
                .map_or(false, |user_limit| user_limit <= channel.members.len())
            {
                log::debug!("{}:     user limit reached", ctx.uid);
                ctx.reply(rpl::ERR_CHANNELISFULL)
                    .param(target)
                    .trailing_param(lines::CHANNEL_IS_FULL);
                return Err(());
            }
            if !channel.is_invited(ctx.uid, &full_name) {
                log::debug!("{}:     not invited", ctx.uid);
                ctx.reply(rpl::ERR_INVITEONLYCHAN)
                    .param(target)
                    .trailing_param(lines::INVITE_ONLY_CHAN);
                return Err(());
            }
            if channel.is_banned(&full_name) {
                log::debug!("{}:     banned", ctx.uid);
                ctx.reply(rpl::ERR_BANNEDFROMCHAN)
                    .param(target)
                    .trailing_param(lines::BANNED_FROM_CHAN);
                return Err(());
            }
        }

        let default_chan_mode = self.config.default_chan_mode.clone();
        let channel = self
            .channels
            .entry(UniCase(target.to_owned()))
            .or_insert_with(|| Channel::new(target, &default_chan_mode));
        channel.add_member(ctx.uid);

        {
            let user = self.users.get_mut(ctx.uid).ok_or(())?;
            user.channels.insert(target.to_owned());
            user.last_action = util::time();
        }

        {
            let users = &self.users;
            let user = users.get(ctx.uid).expect("joined above");
            self.bus
                .broadcast(Hook::OnUserJoin, |m| m.on_user_join(user, target));
        }

        let mut join_response = Buffer::new();
        join_response.message(&full_name, Command::Join).param(target);
        self.broadcast_channel(target, MessageQueueItem::from(join_response), None);

        if let Some(topic) = self.channels.get(u(target)).and_then(|c| c.topic.as_ref()) {
            ctx.reply(rpl::TOPIC).param(target).trailing_param(&topic.text);
        }
        self.write_names(ctx, target);

        {
            let users = &self.users;
            let user = users.get(ctx.uid).expect("joined above");
            self.bus
                .broadcast(Hook::OnPostJoin, |m| m.on_post_join(user, target));
        }

        Ok(())
    }

    // KICK

    pub fn cmd_kick(
        &mut self,
        ctx: &mut CommandContext,
        target: &str,
        nick: &str,
        reason: &str,
    ) -> Result {
        let channel = find_channel(ctx, &self.channels, target)?;
        let member_modes = find_member(ctx, channel, target)?;
        if !member_modes.at_least_halfop() {
            log::debug!("{}:     not operator", ctx.uid);
            ctx.reply(rpl::ERR_CHANOPRIVSNEEDED)
                .param(target)
                .trailing_param(lines::CHAN_O_PRIVS_NEEDED);
            return Err(());
        }

        let kicked = self
            .users
            .by_nick(nick)
            .filter(|uid| channel.members.contains_key(uid));
        let kicked = match kicked {
            Some(kicked) => kicked,
            None => {
                log::debug!("{}:     target not on channel", ctx.uid);
                ctx.reply(rpl::ERR_USERNOTINCHANNEL)
                    .param(nick)
                    .param(target)
                    .trailing_param(lines::USER_NOT_IN_CHANNEL);
                return Err(());
            }
        };

        // Halfops cannot remove full operators.
        if channel.members[&kicked].operator && !member_modes.operator {
            ctx.reply(rpl::ERR_CHANOPRIVSNEEDED)
                .param(target)
                .trailing_param(lines::CHAN_O_PRIVS_NEEDED);
            return Err(());
        }

        let (full_name, kicker_nick) = {
            let user = self.users.get(ctx.uid).ok_or(())?;
            (user.full_name().to_owned(), user.nick().to_owned())
        };
        let mut kick_response = Buffer::new();
        {
            let msg = kick_response
                .message(&full_name, Command::Kick)
                .param(target)
                .param(nick);
            let reason = if reason.is_empty() { &kicker_nick } else { reason };
            msg.trailing_param(&super::truncate(reason, MAX_KICK_LENGTH));
        }
        self.broadcast_channel(target, MessageQueueItem::from(kick_response), None);

        self.remove_membership(kicked, target);
        Ok(())
    }

    // LIST

    pub fn cmd_list(&mut self, ctx: &mut CommandContext, targets: &str) -> Result {
        if targets.is_empty() {
            for (name, channel) in &self.channels {
                if channel.secret && !channel.members.contains_key(&ctx.uid) {
                    continue;
                }
                let msg = ctx.reply(rpl::LIST).param(name.as_ref());
                channel.list_entry(msg);
            }
        } else {
            for name in targets.split(',') {
                if let Some(channel) = self.channels.get(u(name)) {
                    if channel.secret && !channel.members.contains_key(&ctx.uid) {
                        continue;
                    }
                    let msg = ctx.reply(rpl::LIST).param(name);
                    channel.list_entry(msg);
                }
            }
        }

        ctx.reply(rpl::LISTEND).trailing_param(lines::END_OF_LIST);

        Ok(())
    }

    // LUSERS

    pub fn cmd_lusers(&mut self, ctx: &mut CommandContext) -> Result {
        self.write_lusers(ctx);
        Ok(())
    }

    // MODE

    pub fn cmd_mode(
        &mut self,
        ctx: &mut CommandContext,
        target: &str,
        modes: &str,
        params: &[&str],
    ) -> Result {
        if is_channel_name(target) {
            self.channel_mode(ctx, target, modes, params)
        } else {
            self.user_mode(ctx, target, modes)
        }
    }

    fn channel_mode(
        &mut self,
        ctx: &mut CommandContext,
        target: &str,
        modes: &str,
        params: &[&str],
    ) -> Result {
        {
            let channel = find_channel(ctx, &self.channels, target)?;
            if modes.is_empty() {
                let full_info = channel.members.contains_key(&ctx.uid);
                let msg = ctx.reply(rpl::CHANNELMODEIS).param(target);
                channel.write_modes(msg, full_info);
                ctx.reply(rpl::CREATIONTIME)
                    .param(target)
                    .param(&channel.created_at.to_string());
                return Ok(());
            }
        }

        // List queries go to any member; changes need channel status.
        let member_modes = {
            let channel = self.channels.get(u(target)).ok_or(())?;
            find_member(ctx, channel, target)?
        };

        let mut stack = mode::ModeStack::new();
        for entry in mode::channel_query(modes, params) {
            match entry {
                Ok(change) => {
                    use mode::ChannelChange::*;
                    match change {
                        GetBans | GetExceptions | GetInvitations => {
                            self.write_mode_list(ctx, target, &change);
                            continue;
                        }
                        _ => {}
                    }

                    let needs_op = matches!(change, ChangeOperator(..) | ChangeHalfop(..));
                    if (needs_op && !member_modes.operator)
                        || (!needs_op && !member_modes.at_least_halfop())
                    {
                        ctx.reply(rpl::ERR_CHANOPRIVSNEEDED)
                            .param(target)
                            .trailing_param(lines::CHAN_O_PRIVS_NEEDED);
                        continue;
                    }

                    let applied = {
                        let users = &self.users;
                        let channel = self.channels.get_mut(u(target)).ok_or(())?;
                        channel.apply_mode_change(change, |nick| users.by_nick(nick))
                    };
                    match applied {
                        Ok(true) => {
                            stack.push(change.value(), change.symbol(), change.param())
                        }
                        Ok(false) => {}
                        Err(err) => {
                            let mut msg = ctx.reply(err);
                            if err == rpl::ERR_USERNOTINCHANNEL {
                                msg = msg.param(change.param().unwrap_or(""));
                            }
                            msg.param(target).trailing_param(match err {
                                rpl::ERR_KEYSET => lines::KEY_SET,
                                _ => lines::USER_NOT_IN_CHANNEL,
                            });
                        }
                    }
                }
                Err(mode::Error::Unknown(letter, value)) => {
                    let allowed = {
                        let user = self.users.get_mut(ctx.uid).ok_or(())?;
                        self.bus.first_result(Hook::OnExtendedMode, |m| {
                            m.on_extended_mode(user, target, letter, value)
                        }) == ModResult::Allow
                    };
                    if allowed {
                        stack.push(value, letter, None);
                    } else {
                        let mut msg = ctx.reply(rpl::ERR_UNKNOWNMODE);
                        let param = msg.raw_param();
                        param.push(letter);
                        msg.trailing_param(lines::UNKNOWN_MODE);
                    }
                }
                // A letter without its parameter is dropped; the rest of the
                // query still applies.
                Err(mode::Error::MissingParam(..)) | Err(mode::Error::Unchangeable(..)) => {}
            }
        }

        let full_name = self.users.get(ctx.uid).ok_or(())?.full_name().to_owned();
        while let Some(line) = stack.drain(mode::MAX_MODES, 360) {
            let mut buf = Buffer::new();
            {
                let mut msg = buf.message(&full_name, Command::Mode).param(target);
                msg.raw_param().push_str(&line);
            }
            self.broadcast_channel(target, MessageQueueItem::from(buf), None);
        }

        Ok(())
    }

    fn write_mode_list(
        &self,
        ctx: &mut CommandContext,
        target: &str,
        query: &mode::ChannelChange<'_>,
    ) {
        use mode::ChannelChange::*;

        let channel = match self.channels.get(u(target)) {
            Some(channel) => channel,
            None => return,
        };
        let (masks, item, end, end_line) = match query {
            GetBans => (
                &channel.ban_masks,
                rpl::BANLIST,
                rpl::ENDOFBANLIST,
                lines::END_OF_BAN_LIST,
            ),
            GetExceptions => (
                &channel.exception_masks,
                rpl::EXCEPTLIST,
                rpl::ENDOFEXCEPTLIST,
                lines::END_OF_EXCEPT_LIST,
            ),
            _ => (
                &channel.invitation_masks,
                rpl::INVITELIST,
                rpl::ENDOFINVITELIST,
                lines::END_OF_INVITE_LIST,
            ),
        };
        for mask in masks {
            ctx.reply(item).param(target).param(mask);
        }
        ctx.reply(end).param(target).trailing_param(end_line);
    }

    fn user_mode(&mut self, ctx: &mut CommandContext, target: &str, modes: &str) -> Result {
        {
            let nick = self.users.get(ctx.uid).ok_or(())?.nick().to_owned();
            if !selkie_unicase::national_map().eq(&nick, target) {
                if self.users.by_nick(target).is_some() {
                    ctx.reply(rpl::ERR_USERSDONTMATCH)
                        .trailing_param(lines::USERS_DONT_MATCH);
                } else {
                    ctx.reply(rpl::ERR_NOSUCHNICK)
                        .param(target)
                        .trailing_param(lines::NO_SUCH_NICK);
                }
                return Err(());
            }
        }

        if modes.is_empty() {
            let users = &self.users;
            let user = users.get(ctx.uid).ok_or(())?;
            let msg = ctx.reply(rpl::UMODEIS);
            user.write_modes(msg);
            return Ok(());
        }

        let mut stack = mode::ModeStack::new();
        for entry in mode::user_query(modes) {
            match entry {
                Ok(change) => {
                    let user = self.users.get_mut(ctx.uid).ok_or(())?;
                    if user.apply_mode_change(change) {
                        stack.push(change.value(), change.symbol(), None);
                    }
                }
                Err(mode::Error::Unknown(letter, value)) => {
                    let allowed = {
                        let user = self.users.get_mut(ctx.uid).ok_or(())?;
                        self.bus.first_result(Hook::OnExtendedMode, |m| {
                            m.on_extended_mode(user, target, letter, value)
                        }) == ModResult::Allow
                    };
                    if allowed {
                        stack.push(value, letter, None);
                    } else {
                        ctx.reply(rpl::ERR_UMODEUNKNOWNFLAG)
                            .trailing_param(lines::UMODE_UNKNOWN_FLAG);
                    }
                }
                Err(_) => {}
            }
        }

        let nick = self.users.get(ctx.uid).ok_or(())?.nick().to_owned();
        while let Some(line) = stack.drain(mode::MAX_MODES, 360) {
            let mut buf = Buffer::new();
            {
                let mut msg = buf.message(&nick, Command::Mode).param(&nick);
                msg.raw_param().push_str(&line);
            }
            self.send(ctx.uid, MessageQueueItem::from(buf));
        }

        Ok(())
    }

    // MOTD

    pub fn cmd_motd(&mut self, ctx: &mut CommandContext) -> Result {
        self.write_motd(ctx);
        Ok(())
    }

    // NAMES

    pub fn cmd_names(&mut self, ctx: &mut CommandContext, targets: &str) -> Result {
        if targets.is_empty() {
            let names: Vec<String> = self
                .channels
                .values()
                .filter(|c| !c.secret || c.members.contains_key(&ctx.uid))
                .map(|c| c.name.clone())
                .collect();
            for name in names {
                self.write_names(ctx, &name);
            }
        } else {
            for target in targets.split(',').filter(|t| !t.is_empty()) {
                self.write_names(ctx, target);
            }
        }

        Ok(())
    }

    // NICK

    pub fn cmd_nick(&mut self, ctx: &mut CommandContext, nick: &str) -> Result {
        if !is_valid_nickname(nick) {
            log::debug!("{}:     invalid nickname", ctx.uid);
            ctx.reply(rpl::ERR_ERRONEUSNICKNAME)
                .param(nick)
                .trailing_param(lines::ERRONEOUS_NICKNAME);
            return Err(());
        }

        let (oper, exempt) = {
            let user = self.users.get(ctx.uid).ok_or(())?;
            (user.oper, user.exempt)
        };
        if !oper && !exempt {
            if let Some(line) = self.xlines.matches_nick(nick) {
                log::debug!("{}:     Q-lined nickname", ctx.uid);
                let reason = line.reason.clone();
                ctx.reply(rpl::ERR_ERRONEUSNICKNAME)
                    .param(nick)
                    .trailing_param(&format!("Invalid nickname: {}", reason));
                return Err(());
            }
        }

        if let Some(other) = self.users.by_nick(nick) {
            if other != ctx.uid {
                log::debug!("{}:     nickname in use", ctx.uid);
                ctx.reply(rpl::ERR_NICKNAMEINUSE)
                    .param(nick)
                    .trailing_param(lines::NICKNAME_IN_USE);
                return Err(());
            }
        }

        let (registered, full_name) = {
            let user = self.users.get(ctx.uid).ok_or(())?;
            (user.is_registered(), user.full_name().to_owned())
        };

        if registered {
            let mut buf = Buffer::new();
            buf.message(&full_name, Command::Nick).trailing_param(nick);
            self.broadcast_neighbors(ctx.uid, MessageQueueItem::from(buf), true);
        }

        self.users.change_nick(ctx.uid, nick);
        if let Some(user) = self.users.get_mut(ctx.uid) {
            user.registered = user.registered.with_nick();
        }

        Ok(())
    }

    // OPER

    pub fn cmd_oper(&mut self, ctx: &mut CommandContext, name: &str, password: &str) -> Result {
        match self.config.opers.iter().find(|(n, _)| n == name) {
            Some((_, pass)) if pass == password => {}
            Some(_) => {
                log::debug!("{}:     bad oper password", ctx.uid);
                ctx.reply(rpl::ERR_PASSWDMISMATCH)
                    .trailing_param(lines::PASSWORD_MISMATCH);
                return Err(());
            }
            None => {
                log::debug!("{}:     no such oper block", ctx.uid);
                ctx.reply(rpl::ERR_NOOPERHOST).trailing_param(lines::NO_OPER_HOST);
                return Err(());
            }
        }

        let nick = {
            let user = self.users.get_mut(ctx.uid).ok_or(())?;
            user.oper = true;
            user.server_notices = true;
            user.snomasks.extend(['a', 'c', 'k', 'o', 'q', 'x']);
            user.nick().to_owned()
        };
        ctx.reply(rpl::YOUREOPER).trailing_param(lines::YOURE_OPER);

        let mut buf = Buffer::new();
        {
            let mut msg = buf.message(&nick, Command::Mode).param(&nick);
            msg.raw_param().push_str("+os");
        }
        self.send(ctx.uid, MessageQueueItem::from(buf));
        self.snomask_notice('o', &format!("{} is now an IRC operator", nick));

        Ok(())
    }

    // PART

    pub fn cmd_part(&mut self, ctx: &mut CommandContext, targets: &str, reason: &str) -> Result {
        let mut res = Ok(());
        for target in targets.split(',').filter(|t| !t.is_empty()) {
            if self.part_one(ctx, target, reason).is_err() {
                res = Err(());
            }
        }
        res
    }

    fn part_one(&mut self, ctx: &mut CommandContext, target: &str, reason: &str) -> Result {
        {
            let channel = find_channel(ctx, &self.channels, target)?;
            find_member(ctx, channel, target)?;
        }

        let full_name = self.users.get(ctx.uid).ok_or(())?.full_name().to_owned();
        let mut buf = Buffer::new();
        {
            let msg = buf.message(&full_name, Command::Part).param(target);
            if !reason.is_empty() {
                msg.trailing_param(reason);
            }
        }
        self.broadcast_channel(target, MessageQueueItem::from(buf), None);

        {
            let users = &self.users;
            let user = users.get(ctx.uid).expect("found above");
            self.bus
                .broadcast(Hook::OnUserPart, |m| m.on_user_part(user, target, reason));
        }

        self.remove_membership(ctx.uid, target);
        Ok(())
    }

    /// Shared exit bookkeeping for PART, KICK and channel pruning.
    pub(crate) fn remove_membership(&mut self, uid: crate::user::Uid, target: &str) {
        if let Some(user) = self.users.get_mut(uid) {
            user.channels.retain(|name| !selkie_unicase::national_map().eq(name, target));
        }
        let empty = match self.channels.get_mut(u(target)) {
            Some(channel) => channel.remove_member(uid),
            None => false,
        };
        if empty {
            self.channels.remove(u(target));
        }
    }

    // PASS

    pub fn cmd_pass(&mut self, ctx: &mut CommandContext, password: &str) -> Result {
        let expected = self.config.password.clone();
        let user = self.users.get_mut(ctx.uid).ok_or(())?;
        if user.is_registered() {
            ctx.reply(rpl::ERR_ALREADYREGISTRED)
                .trailing_param(lines::ALREADY_REGISTERED);
            return Err(());
        }
        user.has_given_password = expected.map_or(false, |p| p == password);

        Ok(())
    }

    // PING / PONG

    pub fn cmd_ping(&mut self, ctx: &mut CommandContext, token: &str) -> Result {
        let domain = ctx.domain.clone();
        ctx.rb
            .message(&domain, Command::Pong)
            .param(&domain)
            .trailing_param(token);
        Ok(())
    }

    pub fn cmd_pong(&mut self, ctx: &mut CommandContext, _token: &str) -> Result {
        let user = self.users.get_mut(ctx.uid).ok_or(())?;
        user.lastping = true;
        Ok(())
    }

    // PRIVMSG / NOTICE

    pub fn cmd_privmsg_notice(
        &mut self,
        ctx: &mut CommandContext,
        command: Command,
        targets: &str,
        text: &str,
    ) -> Result {
        let notice = command == Command::Notice;

        if text.is_empty() {
            if !notice {
                ctx.reply(rpl::ERR_NOTEXTTOSEND).trailing_param(lines::NO_TEXT_TO_SEND);
            }
            return Err(());
        }

        let target_list: Vec<&str> = targets.split(',').filter(|t| !t.is_empty()).collect();
        if target_list.len() > self.config.max_targets {
            if !notice {
                ctx.reply(rpl::ERR_TOOMANYTARGETS)
                    .param(targets)
                    .trailing_param(lines::TOO_MANY_TARGETS);
            }
            return Err(());
        }

        let full_name = self.users.get(ctx.uid).ok_or(())?.full_name().to_owned();
        let mut res = Ok(());
        for target in target_list {
            let mut buf = Buffer::new();
            buf.message(&full_name, command).param(target).trailing_param(text);
            let item = MessageQueueItem::from(buf);

            if is_channel_name(target) {
                let can_talk = match self.channels.get(u(target)) {
                    Some(channel) => channel.can_talk(ctx.uid),
                    None => {
                        if !notice {
                            ctx.reply(rpl::ERR_NOSUCHNICK)
                                .param(target)
                                .trailing_param(lines::NO_SUCH_NICK);
                        }
                        res = Err(());
                        continue;
                    }
                };
                if !can_talk {
                    if !notice {
                        ctx.reply(rpl::ERR_CANNOTSENDTOCHAN)
                            .param(target)
                            .trailing_param(lines::CANNOT_SEND_TO_CHAN);
                    }
                    res = Err(());
                    continue;
                }
                self.broadcast_channel(target, item, Some(ctx.uid));
            } else {
                let uid = match self.users.by_nick(target) {
                    Some(uid) if self.users.get(uid).map_or(false, |u| u.is_registered()) => uid,
                    _ => {
                        if !notice {
                            ctx.reply(rpl::ERR_NOSUCHNICK)
                                .param(target)
                                .trailing_param(lines::NO_SUCH_NICK);
                        }
                        res = Err(());
                        continue;
                    }
                };
                self.send(uid, item);
                if !notice {
                    let away = self.users.get(uid).and_then(|u| u.away.clone());
                    if let Some(away) = away {
                        let target_nick =
                            self.users.get(uid).map_or_else(String::new, |u| u.nick().to_owned());
                        ctx.reply(rpl::AWAY).param(&target_nick).trailing_param(&away);
                    }
                }
            }
        }

        if let Some(user) = self.users.get_mut(ctx.uid) {
            user.last_action = util::time();
        }
        res
    }

    // QUIT

    pub fn cmd_quit(&mut self, ctx: &mut CommandContext, reason: &str) -> Result {
        let reason = if reason.is_empty() {
            "Client exited".to_owned()
        } else {
            format!("Quit: {}", reason)
        };
        // A client asking to leave gets its pending output drained; every
        // error path stays abortive.
        self.quit_user_graceful(ctx.uid, &reason, None);
        Ok(())
    }

    // TIME

    pub fn cmd_time(&mut self, ctx: &mut CommandContext) -> Result {
        let time = util::time_str();
        ctx.reply(rpl::TIME)
            .param(&self.config.server_name)
            .trailing_param(&time);
        Ok(())
    }

    // TOPIC

    pub fn cmd_topic(
        &mut self,
        ctx: &mut CommandContext,
        target: &str,
        topic: Option<&str>,
    ) -> Result {
        let topic = match topic {
            Some(topic) => topic,
            None => {
                find_channel(ctx, &self.channels, target)?;
                self.write_topic(ctx, target);
                return Ok(());
            }
        };

        {
            let channel = find_channel(ctx, &self.channels, target)?;
            let member_modes = find_member(ctx, channel, target)?;
            if channel.topic_restricted && !member_modes.at_least_halfop() {
                log::debug!("{}:     not operator", ctx.uid);
                ctx.reply(rpl::ERR_CHANOPRIVSNEEDED)
                    .param(target)
                    .trailing_param(lines::CHAN_O_PRIVS_NEEDED);
                return Err(());
            }
        }

        let full_name = self.users.get(ctx.uid).ok_or(())?.full_name().to_owned();
        let text = &super::truncate(topic, MAX_TOPIC_LENGTH);
        if let Some(channel) = self.channels.get_mut(u(target)) {
            channel.topic = if text.is_empty() {
                None
            } else {
                Some(Topic {
                    text: text.to_owned(),
                    set_by: full_name.clone(),
                    set_at: util::time(),
                })
            };
        }

        let mut buf = Buffer::new();
        buf.message(&full_name, Command::Topic)
            .param(target)
            .trailing_param(text);
        self.broadcast_channel(target, MessageQueueItem::from(buf), None);

        Ok(())
    }

    // USER

    pub fn cmd_user(&mut self, ctx: &mut CommandContext, ident: &str, realname: &str) -> Result {
        let user = self.users.get_mut(ctx.uid).ok_or(())?;
        if user.is_registered() || user.registered == RegState::User
            || user.registered == RegState::NickUser
        {
            ctx.reply(rpl::ERR_ALREADYREGISTRED)
                .trailing_param(lines::ALREADY_REGISTERED);
            return Err(());
        }
        user.set_ident(ident);
        user.set_realname(realname);
        user.registered = user.registered.with_user();

        Ok(())
    }

    // VERSION

    pub fn cmd_version(&mut self, ctx: &mut CommandContext) -> Result {
        ctx.reply(rpl::VERSION)
            .param(crate::server_version!())
            .param(&self.config.server_name);
        self.write_i_support(ctx);
        Ok(())
    }

    // WHO

    pub fn cmd_who(&mut self, ctx: &mut CommandContext, mask: &str) -> Result {
        let mask = if mask.is_empty() { "*" } else { mask };

        if is_channel_name(mask) {
            if let Some(channel) = self.channels.get(u(mask)) {
                if !channel.secret || channel.members.contains_key(&ctx.uid) {
                    for (&member, member_modes) in &channel.members {
                        let user = match self.users.get(member) {
                            Some(user) => user,
                            None => continue,
                        };
                        let mut flags = String::from(if user.away.is_some() { "G" } else { "H" });
                        if user.oper {
                            flags.push('*');
                        }
                        if let Some(s) = member_modes.symbol() {
                            flags.push(s);
                        }
                        ctx.reply(rpl::WHOREPLY)
                            .param(mask)
                            .param(user.ident())
                            .param(user.host())
                            .param(&self.config.server_name)
                            .param(user.nick())
                            .param(&flags)
                            .trailing_param(&format!("0 {}", user.realname()));
                    }
                }
            }
        } else {
            let asker = ctx.uid;
            let shares_channel = |target: &crate::user::User| {
                target
                    .channels
                    .iter()
                    .any(|name| self.channels.get(u(name)).map_or(false, |c| c.members.contains_key(&asker)))
            };
            for user in self.users.iter() {
                if !user.is_registered() || user.quitting {
                    continue;
                }
                if user.invisible && user.uid() != asker && !shares_channel(user) {
                    continue;
                }
                if !util::match_glob(mask, user.nick()) && !util::match_glob(mask, user.host()) {
                    continue;
                }
                let mut flags = String::from(if user.away.is_some() { "G" } else { "H" });
                if user.oper {
                    flags.push('*');
                }
                ctx.reply(rpl::WHOREPLY)
                    .param("*")
                    .param(user.ident())
                    .param(user.host())
                    .param(&self.config.server_name)
                    .param(user.nick())
                    .param(&flags)
                    .trailing_param(&format!("0 {}", user.realname()));
            }
        }

        ctx.reply(rpl::ENDOFWHO).param(mask).trailing_param(lines::END_OF_WHO);
        Ok(())
    }

    // WHOIS

    pub fn cmd_whois(&mut self, ctx: &mut CommandContext, nick: &str) -> Result {
        let target = find_nick(ctx, &self.users, nick)?;
        let now = util::time();

        {
            let users = &self.users;
            let user = users.get(target).ok_or(())?;
            ctx.reply(rpl::WHOISUSER)
                .param(user.nick())
                .param(user.ident())
                .param(user.host())
                .param("*")
                .trailing_param(user.realname());

            let mut channel_names = String::new();
            for name in &user.channels {
                let channel = match self.channels.get(u(name)) {
                    Some(channel) => channel,
                    None => continue,
                };
                if channel.secret
                    && !channel.members.contains_key(&ctx.uid)
                    && ctx.uid != target
                {
                    continue;
                }
                if let Some(symbol) = channel.members.get(&target).and_then(|m| m.symbol()) {
                    channel_names.push(symbol);
                }
                channel_names.push_str(name);
                channel_names.push(' ');
            }
            if !channel_names.is_empty() {
                channel_names.pop();
                ctx.reply(rpl::WHOISCHANNELS)
                    .param(user.nick())
                    .trailing_param(&channel_names);
            }

            ctx.reply(rpl::WHOISSERVER)
                .param(user.nick())
                .param(&self.config.server_name)
                .trailing_param(lines::ADMIN_ME);
            if user.oper {
                ctx.reply(rpl::WHOISOPERATOR)
                    .param(user.nick())
                    .trailing_param("is an IRC operator");
            }
            if let Some(ref away) = user.away {
                ctx.reply(rpl::AWAY).param(user.nick()).trailing_param(away);
            }
            ctx.reply(rpl::WHOISIDLE)
                .param(user.nick())
                .param(&now.saturating_sub(user.last_action).to_string())
                .param(&user.signon.to_string())
                .trailing_param("seconds idle, signon time");
        }

        {
            let domain = ctx.domain.clone();
            let users = &self.users;
            let asker = users.get(ctx.uid).ok_or(())?;
            let target = users.get(target).ok_or(())?;
            self.bus
                .broadcast(Hook::OnWhois, |m| m.on_whois(&domain, asker, target, &mut ctx.rb));
        }

        let nick = self.users.get(target).ok_or(())?.nick().to_owned();
        ctx.reply(rpl::ENDOFWHOIS)
            .param(&nick)
            .trailing_param(lines::END_OF_WHOIS);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nickname_validation() {
        assert!(is_valid_nickname("alice"));
        assert!(is_valid_nickname("[w]heel-1"));
        assert!(is_valid_nickname("foo{bar"));
        assert!(!is_valid_nickname(""));
        assert!(!is_valid_nickname("9lives"));
        assert!(!is_valid_nickname("-dash"));
        assert!(!is_valid_nickname("with space"));
        assert!(!is_valid_nickname(&"x".repeat(MAX_NICKNAME_LENGTH + 1)));
    }

    #[test]
    fn test_channel_name_validation() {
        assert!(is_valid_channel_name("#core"));
        assert!(is_valid_channel_name("&local"));
        assert!(!is_valid_channel_name("core"));
        assert!(!is_valid_channel_name("#with space"));
        assert!(!is_valid_channel_name("#with,comma"));
    }
}
