use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures::{channel::mpsc, select, SinkExt, StreamExt};
use lectern_api::{access, FeedMessage, FeedRequest, Room, UserId, Uuid};
use tokio::sync::RwLock;

use crate::{db, extractors::PgPool};

/// Decides whether a user may subscribe to a room
#[async_trait]
pub trait RoomAccess: 'static + Send + Sync {
    async fn may_join(&self, user: UserId, room: Room) -> anyhow::Result<bool>;
}

#[async_trait]
impl RoomAccess for PgPool {
    async fn may_join(&self, user: UserId, room: Room) -> anyhow::Result<bool> {
        let mut conn = self.acquire().await?;
        access::may_join(&mut db::PostgresDb { conn: &mut *conn }, user, room).await
    }
}

type Subscriber = (UserId, mpsc::UnboundedSender<FeedMessage>);

#[derive(Clone, Debug)]
pub struct RoomFeeds(Arc<RwLock<HashMap<Room, HashMap<Uuid, Subscriber>>>>);

impl RoomFeeds {
    pub fn new() -> RoomFeeds {
        RoomFeeds(Arc::new(RwLock::new(HashMap::new())))
    }

    /// Serves an authenticated feed socket until it closes
    pub async fn add_connection<W, R, A>(self, user: UserId, mut write: W, read: R, access: A)
    where
        W: 'static + Send + Unpin + futures::Sink<Message>,
        <W as futures::Sink<Message>>::Error: Send,
        R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
        A: RoomAccess,
    {
        // Must stay unbounded: relaying holds the read-lock that removing a socket needs
        let (sender, mut receiver) = mpsc::unbounded();
        let sender_id = Uuid::new_v4();

        let this = self.clone();
        let mut read = read.fuse();
        tokio::spawn(async move {
            let mut joined = HashSet::<Room>::new();
            macro_rules! remove_self {
                () => {{
                    this.leave_all(sender_id, &joined).await;
                    tracing::debug!(?user, "feed websocket closed");
                    return;
                }};
            }
            macro_rules! send_message {
                ( $msg:expr ) => {{
                    let msg: FeedMessage = $msg;
                    let json = match serde_json::to_vec(&msg) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::error!(?err, ?msg, "failed serializing message to json");
                            continue;
                        }
                    };
                    if write.send(Message::Binary(json)).await.is_err() {
                        remove_self!();
                    }
                }};
            }
            loop {
                select! {
                    msg = receiver.next() => match msg {
                        None => remove_self!(),
                        Some(msg) => {
                            // the room dropped this socket on its own
                            if let FeedMessage::Left(room) = msg {
                                joined.remove(&room);
                            }
                            send_message!(msg)
                        }
                    },
                    msg = read.next() => match msg {
                        None => remove_self!(),
                        Some(Ok(Message::Close(_))) => remove_self!(),
                        Some(Ok(Message::Text(msg))) => match FeedRequest::parse(&msg) {
                            Some(FeedRequest::Ping) => send_message!(FeedMessage::Pong),
                            Some(FeedRequest::Join(room)) => {
                                let allowed = match access.may_join(user, room).await {
                                    Ok(allowed) => allowed,
                                    Err(err) => {
                                        tracing::error!(?err, ?user, ?room, "failed checking room access");
                                        false
                                    }
                                };
                                if allowed {
                                    joined.insert(room);
                                    this.join(room, sender_id, (user, sender.clone())).await;
                                    send_message!(FeedMessage::Joined(room));
                                } else {
                                    send_message!(FeedMessage::JoinDenied(room));
                                }
                            }
                            Some(FeedRequest::Leave(room)) => {
                                if joined.remove(&room) {
                                    this.leave(room, sender_id).await;
                                }
                                send_message!(FeedMessage::Left(room));
                            }
                            None => {
                                tracing::warn!("received unexpected message from client: {msg:?}");
                                remove_self!();
                            }
                        },
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => (),
                        Some(msg) => {
                            tracing::warn!("received unexpected message from client: {msg:?}");
                            remove_self!();
                        }
                    },
                }
            }
        });
    }

    async fn join(&self, room: Room, sender_id: Uuid, sender: Subscriber) {
        self.0
            .write()
            .await
            .entry(room)
            .or_insert_with(HashMap::new)
            .insert(sender_id, sender);
    }

    async fn leave(&self, room: Room, sender_id: Uuid) {
        let mut rooms = self.0.write().await;
        if let Some(socks) = rooms.get_mut(&room) {
            socks.remove(&sender_id);
            if socks.is_empty() {
                rooms.remove(&room);
            }
        }
    }

    async fn leave_all(&self, sender_id: Uuid, joined: &HashSet<Room>) {
        for room in joined {
            self.leave(*room, sender_id).await;
        }
    }

    /// Sends `msg` to every socket currently subscribed to `room`
    pub async fn relay(&self, room: Room, msg: FeedMessage) {
        if let Some(socks) = self.0.read().await.get(&room) {
            tracing::debug!(?room, subscribers = socks.len(), "relaying feed message");
            for (_, s) in socks.values() {
                let _ = s.unbounded_send(msg.clone());
            }
        }
    }

    /// Unsubscribes all the sockets of `user` from `room`, telling them they left
    pub async fn evict(&self, room: Room, user: UserId) {
        let mut rooms = self.0.write().await;
        if let Some(socks) = rooms.get_mut(&room) {
            socks.retain(|_, (u, s)| {
                if *u != user {
                    return true;
                }
                let _ = s.unbounded_send(FeedMessage::Left(room));
                false
            });
            if socks.is_empty() {
                rooms.remove(&room);
            }
        }
        tracing::debug!(?room, ?user, "evicted user from room");
    }

    /// Unsubscribes every socket from `room`, which no longer exists
    pub async fn close(&self, room: Room) {
        if let Some(socks) = self.0.write().await.remove(&room) {
            tracing::debug!(?room, subscribers = socks.len(), "closing room");
            for (_, s) in socks.values() {
                let _ = s.unbounded_send(FeedMessage::Left(room));
            }
        }
    }

    pub async fn subscribers(&self, room: Room) -> usize {
        self.0.read().await.get(&room).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};

    use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
    use lectern_api::{CourseId, LessonId};

    use super::*;

    struct Allow(HashSet<Room>);

    #[async_trait]
    impl RoomAccess for Allow {
        async fn may_join(&self, _user: UserId, room: Room) -> anyhow::Result<bool> {
            Ok(self.0.contains(&room))
        }
    }

    struct Client {
        to_server: UnboundedSender<Result<Message, axum::Error>>,
        from_server: UnboundedReceiver<Message>,
    }

    impl Client {
        fn send(&self, req: &str) {
            self.to_server
                .unbounded_send(Ok(Message::Text(String::from(req))))
                .unwrap();
        }

        async fn assert_silent(&mut self) {
            let res =
                tokio::time::timeout(Duration::from_millis(100), self.from_server.next()).await;
            assert!(res.is_err(), "unexpected feed message {res:?}");
        }

        async fn recv(&mut self) -> FeedMessage {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.from_server.next())
                .await
                .expect("timed out waiting for feed message")
                .expect("feed socket closed");
            match msg {
                Message::Binary(b) => serde_json::from_slice(&b).unwrap(),
                m => panic!("unexpected message {m:?}"),
            }
        }
    }

    async fn connect(feeds: &RoomFeeds, allowed: impl IntoIterator<Item = Room>) -> Client {
        connect_as(feeds, UserId::stub(), allowed).await
    }

    async fn connect_as(
        feeds: &RoomFeeds,
        user: UserId,
        allowed: impl IntoIterator<Item = Room>,
    ) -> Client {
        let (to_server, read) = mpsc::unbounded();
        let (write, from_server) = mpsc::unbounded();
        feeds
            .clone()
            .add_connection(
                user,
                write,
                read,
                Allow(allowed.into_iter().collect()),
            )
            .await;
        Client {
            to_server,
            from_server,
        }
    }

    fn join(room: Room) -> String {
        serde_json::to_string(&FeedRequest::Join(room)).unwrap()
    }

    #[tokio::test]
    async fn relays_to_joined_rooms_only() {
        let feeds = RoomFeeds::new();
        let lesson = Room::Lesson(LessonId(Uuid::new_v4()));
        let other = Room::Lesson(LessonId(Uuid::new_v4()));
        let mut client = connect(&feeds, [lesson, other]).await;

        client.send("ping");
        assert_eq!(client.recv().await, FeedMessage::Pong);
        client.send(&join(lesson));
        assert_eq!(client.recv().await, FeedMessage::Joined(lesson));
        assert_eq!(feeds.subscribers(lesson).await, 1);

        feeds.relay(other, FeedMessage::Pong).await;
        feeds.relay(lesson, FeedMessage::Left(other)).await;
        assert_eq!(client.recv().await, FeedMessage::Left(other));

        client.send(&serde_json::to_string(&FeedRequest::Leave(lesson)).unwrap());
        assert_eq!(client.recv().await, FeedMessage::Left(lesson));
        assert_eq!(feeds.subscribers(lesson).await, 0);
    }

    #[tokio::test]
    async fn denied_join_keeps_socket_open() {
        let feeds = RoomFeeds::new();
        let course = Room::Course(CourseId(Uuid::new_v4()));
        let mut client = connect(&feeds, []).await;

        client.send(&join(course));
        assert_eq!(client.recv().await, FeedMessage::JoinDenied(course));
        assert_eq!(feeds.subscribers(course).await, 0);
        client.send("ping");
        assert_eq!(client.recv().await, FeedMessage::Pong);
    }

    #[tokio::test]
    async fn closing_unsubscribes() {
        let feeds = RoomFeeds::new();
        let course = Room::Course(CourseId(Uuid::new_v4()));
        let mut client = connect(&feeds, [course]).await;
        client.send(&join(course));
        assert_eq!(client.recv().await, FeedMessage::Joined(course));

        drop(client.to_server);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while feeds.subscribers(course).await != 0 {
            assert!(tokio::time::Instant::now() < deadline, "socket was never removed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn evicted_users_stop_receiving() {
        let feeds = RoomFeeds::new();
        let lesson = Room::Lesson(LessonId(Uuid::new_v4()));
        let leaving = UserId(Uuid::new_v4());
        let mut gone = connect_as(&feeds, leaving, [lesson]).await;
        let mut staying = connect(&feeds, [lesson]).await;
        for c in [&mut gone, &mut staying] {
            c.send(&join(lesson));
            assert_eq!(c.recv().await, FeedMessage::Joined(lesson));
        }
        assert_eq!(feeds.subscribers(lesson).await, 2);

        feeds.evict(lesson, leaving).await;
        assert_eq!(gone.recv().await, FeedMessage::Left(lesson));
        assert_eq!(feeds.subscribers(lesson).await, 1);

        feeds.relay(lesson, FeedMessage::Pong).await;
        assert_eq!(staying.recv().await, FeedMessage::Pong);
        gone.assert_silent().await;

        feeds.close(lesson).await;
        assert_eq!(staying.recv().await, FeedMessage::Left(lesson));
        assert_eq!(feeds.subscribers(lesson).await, 0);
        feeds.relay(lesson, FeedMessage::Pong).await;
        staying.assert_silent().await;

        // both sockets stay usable
        gone.send("ping");
        assert_eq!(gone.recv().await, FeedMessage::Pong);
    }
}
