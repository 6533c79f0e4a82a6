//! 数据访问服务测试
//! 授权、审计与所有者不变性

use access_engine::{
    models::{
        audit::{AuditFilters, AuditOperation},
        policy::DenyReason,
        principal::{OrgRole, Principal},
        resource::{NewResource, ResourceClass},
        retention::RetentionMode,
    },
    AppError,
};
use serde_json::json;
use uuid::Uuid;

mod common;
use common::setup_engine;

// ==================== 创建与读取 ====================

#[tokio::test]
async fn test_owner_create_and_read() {
    let t = setup_engine();
    let alice = t.user("standard", None).await;

    let dataset = t
        .engine
        .data
        .create(&alice, NewResource::new(ResourceClass::Dataset, json!({"name": "sales"})))
        .await
        .unwrap();

    assert_eq!(dataset.owner_id, alice.user_id());
    assert_eq!(dataset.created_at, common::t0());

    let read = t
        .engine
        .data
        .read(&alice, ResourceClass::Dataset, dataset.id)
        .await
        .unwrap();
    assert_eq!(read.payload, json!({"name": "sales"}));
}

#[tokio::test]
async fn test_read_with_wrong_class_is_not_found() {
    let t = setup_engine();
    let alice = t.user("standard", None).await;

    let dataset = t
        .engine
        .data
        .create(&alice, NewResource::new(ResourceClass::Dataset, json!({})))
        .await
        .unwrap();

    let err = t
        .engine
        .data
        .read(&alice, ResourceClass::Model, dataset.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = t
        .engine
        .data
        .read(&alice, ResourceClass::Dataset, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_create_rejects_non_generic_and_child_classes() {
    let t = setup_engine();
    let alice = t.user("standard", None).await;

    for class in [
        ResourceClass::Credential,
        ResourceClass::Membership,
        ResourceClass::AuditEntry,
        ResourceClass::Message,
    ] {
        let err = t
            .engine
            .data
            .create(&alice, NewResource::new(class, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "class {}", class);
    }

    // 只有会话带保留模式
    let err = t
        .engine
        .data
        .create(
            &alice,
            NewResource::new(ResourceClass::Dataset, json!({})).with_retention(RetentionMode::OneDay),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    assert_eq!(t.store.resource_count(), 0);
    assert_eq!(t.store.audit_len(), 0);
}

// ==================== 授权 ====================

#[tokio::test]
async fn test_stranger_denied_without_side_effects() {
    let t = setup_engine();
    let alice = t.user("standard", None).await;
    let mallory = t.user("standard", None).await;

    let dataset = t
        .engine
        .data
        .create(&alice, NewResource::new(ResourceClass::Dataset, json!({"v": 1})))
        .await
        .unwrap();
    let audit_before = t.store.audit_len();

    let err = t
        .engine
        .data
        .read(&mallory, ResourceClass::Dataset, dataset.id)
        .await
        .unwrap_err();
    assert_eq!(err.deny_reason(), Some(&DenyReason::NoMatchingRule));

    let err = t
        .engine
        .data
        .update_payload(&mallory, ResourceClass::Dataset, dataset.id, json!({"v": 2}))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Denied(_)));

    let err = t
        .engine
        .data
        .delete(&mallory, ResourceClass::Dataset, dataset.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Denied(_)));

    // 被拒绝的请求不产生审计，也不修改数据
    assert_eq!(t.store.audit_len(), audit_before);
    let still = t
        .engine
        .data
        .read(&alice, ResourceClass::Dataset, dataset.id)
        .await
        .unwrap();
    assert_eq!(still.payload, json!({"v": 1}));
}

#[tokio::test]
async fn test_anonymous_denied_by_explicit_rule() {
    let t = setup_engine();
    let alice = t.user("standard", None).await;

    let doc = t
        .engine
        .data
        .create(&alice, NewResource::new(ResourceClass::Document, json!({})))
        .await
        .unwrap();

    let err = t
        .engine
        .data
        .read(&Principal::Anonymous, ResourceClass::Document, doc.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err.deny_reason(),
        Some(DenyReason::ExplicitDeny { rule_id }) if rule_id == "document-anonymous-deny"
    ));

    let err = t
        .engine
        .data
        .create(&Principal::Anonymous, NewResource::new(ResourceClass::Document, json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Denied(_)));
    assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_shared_user_can_read_but_not_write() {
    let t = setup_engine();
    let alice = t.user("standard", None).await;
    let bob = t.user("standard", None).await;

    let model = t
        .engine
        .data
        .create(&alice, NewResource::new(ResourceClass::Model, json!({"weights": "v1"})))
        .await
        .unwrap();

    let shared = t
        .engine
        .data
        .share_with(
            &alice,
            ResourceClass::Model,
            model.id,
            vec![bob.user_id().unwrap(), bob.user_id().unwrap()],
        )
        .await
        .unwrap();
    assert_eq!(shared.shared_with, vec![bob.user_id().unwrap()]);

    assert!(t
        .engine
        .data
        .read(&bob, ResourceClass::Model, model.id)
        .await
        .is_ok());

    let err = t
        .engine
        .data
        .update_payload(&bob, ResourceClass::Model, model.id, json!({"weights": "v2"}))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Denied(_)));
}

#[tokio::test]
async fn test_org_admin_access_and_member_limits() {
    let t = setup_engine();
    let org = Uuid::new_v4();
    let admin = t.org_user(org, OrgRole::Admin).await;
    let member = t.org_user(org, OrgRole::Member).await;

    let job = t
        .engine
        .data
        .create(&member, NewResource::new(ResourceClass::Job, json!({"step": 1})).in_org(org))
        .await
        .unwrap();
    let admin_job = t
        .engine
        .data
        .create(&admin, NewResource::new(ResourceClass::Job, json!({})).in_org(org))
        .await
        .unwrap();

    // 管理员可以修改组织内任意资源，所有者不变
    let updated = t
        .engine
        .data
        .update_payload(&admin, ResourceClass::Job, job.id, json!({"step": 2}))
        .await
        .unwrap();
    assert_eq!(updated.owner_id, member.user_id());
    assert_eq!(updated.payload, json!({"step": 2}));

    // 普通成员不能读取他人的组织资源
    let err = t
        .engine
        .data
        .read(&member, ResourceClass::Job, admin_job.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Denied(_)));

    // 其他组织的管理员无权访问
    let outsider = t.org_user(Uuid::new_v4(), OrgRole::Owner).await;
    assert!(t
        .engine
        .data
        .read(&outsider, ResourceClass::Job, job.id)
        .await
        .is_err());
}

// ==================== 审计 ====================

#[tokio::test]
async fn test_each_mutation_records_exactly_one_entry() {
    let t = setup_engine();
    let alice = t.user("standard", None).await;
    let start = t.store.audit_len();

    let doc = t
        .engine
        .data
        .create(&alice, NewResource::new(ResourceClass::Document, json!({"title": "a"})))
        .await
        .unwrap();
    assert_eq!(t.store.audit_len(), start + 1);

    t.engine
        .data
        .update_payload(&alice, ResourceClass::Document, doc.id, json!({"title": "b"}))
        .await
        .unwrap();
    assert_eq!(t.store.audit_len(), start + 2);

    // 读取不产生审计
    t.engine
        .data
        .read(&alice, ResourceClass::Document, doc.id)
        .await
        .unwrap();
    assert_eq!(t.store.audit_len(), start + 2);

    t.engine
        .data
        .delete(&alice, ResourceClass::Document, doc.id)
        .await
        .unwrap();
    assert_eq!(t.store.audit_len(), start + 3);

    let filters = AuditFilters {
        resource_id: Some(doc.id),
        ..Default::default()
    };
    let entries = t
        .engine
        .audit
        .list(&alice, &filters, 10, 0)
        .await
        .unwrap();

    let ops: Vec<AuditOperation> = entries.iter().map(|e| e.operation).collect();
    assert_eq!(
        ops,
        vec![AuditOperation::Create, AuditOperation::Update, AuditOperation::Delete]
    );
    assert_eq!(entries[1].prior_state.as_ref().unwrap()["payload"], json!({"title": "a"}));
    assert_eq!(entries[1].new_state.as_ref().unwrap()["payload"], json!({"title": "b"}));
    assert!(entries[2].new_state.is_none());
    assert!(entries.iter().all(|e| e.actor_id == alice.user_id()));
}

#[tokio::test]
async fn test_audit_chain_stays_valid_across_mutations() {
    let t = setup_engine();
    let alice = t.user("standard", None).await;

    for i in 0..5 {
        t.engine
            .data
            .create(&alice, NewResource::new(ResourceClass::Dataset, json!({ "i": i })))
            .await
            .unwrap();
    }

    let verification = t.engine.audit.verify_log(&t.service()).await.unwrap();
    assert!(verification.valid);
    assert_eq!(verification.total_entries, 5);
}

// ==================== 删除与子资源 ====================

#[tokio::test]
async fn test_delete_conversation_removes_children() {
    let t = setup_engine();
    let alice = t.user("standard", None).await;

    let conversation = t
        .engine
        .data
        .create(
            &alice,
            NewResource::new(ResourceClass::Conversation, json!({}))
                .with_retention(RetentionMode::Indefinite),
        )
        .await
        .unwrap();

    for text in ["hi", "there"] {
        let outcome = t
            .engine
            .data
            .add_child(&alice, conversation.id, json!({ "text": text }))
            .await
            .unwrap();
        assert!(!outcome.is_discarded());
    }
    assert_eq!(t.store.resource_count(), 3);

    t.engine
        .data
        .delete(&alice, ResourceClass::Conversation, conversation.id)
        .await
        .unwrap();
    assert_eq!(t.store.resource_count(), 0);

    let err = t
        .engine
        .data
        .delete(&alice, ResourceClass::Conversation, conversation.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_child_inherits_parent_ownership_and_sharing() {
    let t = setup_engine();
    let alice = t.user("standard", None).await;
    let bob = t.user("standard", None).await;

    let conversation = t
        .engine
        .data
        .create(&alice, NewResource::new(ResourceClass::Conversation, json!({})))
        .await
        .unwrap();
    t.engine
        .data
        .share_with(
            &alice,
            ResourceClass::Conversation,
            conversation.id,
            vec![bob.user_id().unwrap()],
        )
        .await
        .unwrap();

    let outcome = t
        .engine
        .data
        .add_child(&alice, conversation.id, json!({"text": "hello"}))
        .await
        .unwrap();
    let access_engine::services::ChildOutcome::Stored(message) = outcome else {
        panic!("message should be stored");
    };

    assert_eq!(message.class, ResourceClass::Message);
    assert_eq!(message.owner_id, alice.user_id());
    assert_eq!(message.parent_id, Some(conversation.id));
    // 没有保留模式的会话，消息永不过期
    assert_eq!(message.expires_at, None);

    // 共享用户可以读消息，但不能在会话中写入
    assert!(t
        .engine
        .data
        .read(&bob, ResourceClass::Message, message.id)
        .await
        .is_ok());
    let err = t
        .engine
        .data
        .add_child(&bob, conversation.id, json!({"text": "intrusion"}))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Denied(_)));
}
