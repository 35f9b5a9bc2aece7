mod common;

use chat_companion::persistence::{decode_chats, CHATS_KEY};
use chat_companion::{
    AIMessage, CompletionError, Message, MessageRole, SendOutcome, SendPipeline, TurnStart,
};
use common::{memory_store, ScriptedClient, SYSTEM};
use std::sync::Arc;
use tokio::sync::Notify;

fn pipeline_with(store: &chat_companion::ChatStore, client: Arc<ScriptedClient>) -> SendPipeline {
    SendPipeline::new(store.clone(), client, SYSTEM.to_string())
}

#[tokio::test]
async fn first_message_creates_conversation_and_stores_reply() {
    let (backend, store) = memory_store().await;
    let client = Arc::new(ScriptedClient::new().reply("chatcmpl-1", "Hi there"));
    let pipeline = pipeline_with(&store, client.clone());

    let mut input = "Hello".to_string();
    let outcome = pipeline.send_user_turn(&mut input).await;

    assert!(input.is_empty());
    assert!(matches!(outcome, SendOutcome::Replied { delivered: true, .. }));

    let chats = store.chats().await;
    assert_eq!(chats.len(), 1);
    let messages = &chats[0].messages;
    assert_eq!(messages.len(), 2);
    assert!(messages[0].is_user);
    assert_eq!(messages[0].content, "Hello");
    assert!(!messages[1].is_user);
    assert_eq!(messages[1].content, "Hi there");
    assert_eq!(messages[1].id, "chatcmpl-1");
    assert_eq!(store.current_chat_id().await, Some(chats[0].id.clone()));

    assert_eq!(
        client.calls(),
        vec![vec![
            AIMessage::new(MessageRole::System, SYSTEM),
            AIMessage::new(MessageRole::User, "Hello"),
        ]]
    );

    store.flush().await;
    let persisted = decode_chats(&backend.entry(CHATS_KEY).unwrap()).unwrap();
    assert_eq!(persisted, chats);
}

#[tokio::test]
async fn follow_up_sends_full_transcript_in_order() {
    let (_backend, store) = memory_store().await;
    let chat_id = store.create_conversation(None).await;
    store
        .append_message(&chat_id, Message::user("1".into(), "I have a headache".into()))
        .await;
    store
        .append_message(&chat_id, Message::assistant("2".into(), "How long has it lasted?".into()))
        .await;
    store.create_conversation(None).await;
    store.select_conversation(&chat_id).await;

    let client = Arc::new(ScriptedClient::new().reply("r", "Drink water."));
    let pipeline = pipeline_with(&store, client.clone());

    let mut input = "Follow-up".to_string();
    pipeline.send_user_turn(&mut input).await;

    assert_eq!(
        client.calls(),
        vec![vec![
            AIMessage::new(MessageRole::System, SYSTEM),
            AIMessage::new(MessageRole::User, "I have a headache"),
            AIMessage::new(MessageRole::Assistant, "How long has it lasted?"),
            AIMessage::new(MessageRole::User, "Follow-up"),
        ]]
    );
    assert_eq!(store.conversation(&chat_id).await.unwrap().messages.len(), 4);
}

#[tokio::test]
async fn blank_input_is_ignored() {
    let (_backend, store) = memory_store().await;
    let client = Arc::new(ScriptedClient::new());
    let pipeline = pipeline_with(&store, client.clone());

    for blank in ["", "   ", "\n\t "] {
        let mut input = blank.to_string();
        assert!(matches!(pipeline.send_user_turn(&mut input).await, SendOutcome::Ignored));
        assert_eq!(input, blank);
    }

    assert!(store.chats().await.is_empty());
    assert!(client.calls().is_empty());
    assert!(!pipeline.busy().is_busy());
}

#[tokio::test]
async fn failed_completion_keeps_user_message_and_clears_busy() {
    let (_backend, store) = memory_store().await;
    let gate = Arc::new(Notify::new());
    let client = Arc::new(
        ScriptedClient::gated(gate.clone())
            .fail(CompletionError::Api { status: 503, body: "overloaded".into() }),
    );
    let pipeline = pipeline_with(&store, client);

    let mut input = "Is this serious?".to_string();
    let TurnStart::Started(turn) = pipeline.begin_turn(&mut input).await else {
        panic!("turn should start");
    };
    assert!(input.is_empty());
    assert!(pipeline.busy().is_busy());

    let chat_id = turn.chat_id().to_string();
    let task = tokio::spawn(turn.complete());
    gate.notify_one();
    let outcome = task.await.unwrap();

    assert!(matches!(outcome, SendOutcome::Failed { .. }));
    assert!(!pipeline.busy().is_busy());
    let messages = store.conversation(&chat_id).await.unwrap().messages;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_user);
}

#[tokio::test]
async fn reply_lands_in_originating_conversation_after_switch() {
    let (_backend, store) = memory_store().await;
    let gate = Arc::new(Notify::new());
    let client = Arc::new(ScriptedClient::gated(gate.clone()).reply("r1", "Reply for A"));
    let pipeline = pipeline_with(&store, client);

    let mut input = "Question for A".to_string();
    let TurnStart::Started(turn) = pipeline.begin_turn(&mut input).await else {
        panic!("turn should start");
    };
    let chat_a = turn.chat_id().to_string();
    let task = tokio::spawn(turn.complete());

    let chat_b = store.create_conversation(None).await;
    assert_eq!(store.current_chat_id().await, Some(chat_b.clone()));

    gate.notify_one();
    task.await.unwrap();

    let a = store.conversation(&chat_a).await.unwrap();
    assert_eq!(a.messages.len(), 2);
    assert_eq!(a.messages[1].content, "Reply for A");
    assert!(store.conversation(&chat_b).await.unwrap().messages.is_empty());
}

#[tokio::test]
async fn reply_for_deleted_conversation_is_dropped() {
    let (_backend, store) = memory_store().await;
    let gate = Arc::new(Notify::new());
    let client = Arc::new(ScriptedClient::gated(gate.clone()).reply("r1", "Too late"));
    let pipeline = pipeline_with(&store, client);

    let mut input = "Hello".to_string();
    let TurnStart::Started(turn) = pipeline.begin_turn(&mut input).await else {
        panic!("turn should start");
    };
    let chat_id = turn.chat_id().to_string();
    let task = tokio::spawn(turn.complete());

    assert!(store.delete_conversation(&chat_id).await);
    gate.notify_one();

    let outcome = task.await.unwrap();
    assert!(matches!(outcome, SendOutcome::Replied { delivered: false, .. }));
    assert!(store.chats().await.is_empty());
    assert!(!pipeline.busy().is_busy());
}

#[tokio::test]
async fn second_send_to_busy_conversation_is_rejected() {
    let (_backend, store) = memory_store().await;
    let gate = Arc::new(Notify::new());
    let client = Arc::new(ScriptedClient::gated(gate.clone()).reply("r1", "First answer"));
    let pipeline = pipeline_with(&store, client.clone());

    let mut input = "First".to_string();
    let TurnStart::Started(turn) = pipeline.begin_turn(&mut input).await else {
        panic!("turn should start");
    };
    let chat_id = turn.chat_id().to_string();
    let task = tokio::spawn(turn.complete());

    let mut second = "Second".to_string();
    let outcome = pipeline.send_user_turn(&mut second).await;
    assert!(matches!(outcome, SendOutcome::Busy { chat_id: ref id } if *id == chat_id));
    assert_eq!(second, "Second");

    gate.notify_one();
    task.await.unwrap();

    let messages = store.conversation(&chat_id).await.unwrap().messages;
    let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["First", "First answer"]);
    assert_eq!(client.calls().len(), 1);
}

#[tokio::test]
async fn dropping_a_pending_turn_clears_busy() {
    let (_backend, store) = memory_store().await;
    let pipeline = pipeline_with(&store, Arc::new(ScriptedClient::new()));

    let mut input = "Never mind".to_string();
    let turn = match pipeline.begin_turn(&mut input).await {
        TurnStart::Started(turn) => turn,
        _ => panic!("turn should start"),
    };
    assert!(pipeline.busy().is_busy());

    drop(turn);
    assert!(!pipeline.busy().is_busy());
}

#[tokio::test]
async fn colliding_reply_id_gets_fresh_id() {
    let (_backend, store) = memory_store().await;
    let client = Arc::new(
        ScriptedClient::new()
            .reply("same", "one")
            .reply("same", "two"),
    );
    let pipeline = pipeline_with(&store, client);

    let mut input = "a".to_string();
    pipeline.send_user_turn(&mut input).await;
    let mut input = "b".to_string();
    pipeline.send_user_turn(&mut input).await;

    let chat = store.current_conversation().await.unwrap();
    let mut ids: Vec<_> = chat.messages.iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids.len(), 4);
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}

#[tokio::test]
async fn send_with_dangling_selection_starts_new_conversation() {
    let (_backend, store) = memory_store().await;
    store.select_conversation("gone").await;
    let pipeline = pipeline_with(&store, Arc::new(ScriptedClient::new().reply("r", "ok")));

    let mut input = "Hello".to_string();
    pipeline.send_user_turn(&mut input).await;

    let chats = store.chats().await;
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].messages.len(), 2);
    assert_eq!(store.current_chat_id().await, Some(chats[0].id.clone()));
}
