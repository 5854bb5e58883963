use actix_web::{delete, get, post, web, HttpResponse, Result as WebResult};
use duckdb::Connection;
use std::sync::MutexGuard;
use uuid::Uuid;

use crate::api::middleware::Identity;
use crate::api::models::{
    CreateExpertRequest, PaginationQuery, ReferralAvailability, ReferralListQuery, SendMessageRequest,
    StartConsultationRequest, SyncStatus,
};
use crate::config::UserRole;
use crate::consultation::ConsultationService;
use crate::db::{service::DbService, DbPool, ReviewOutcome};
use crate::triage::ReferralDecision;

fn lock(pool: &DbPool) -> WebResult<MutexGuard<'_, Connection>> {
    pool.lock()
        .map_err(|_| actix_web::error::ErrorInternalServerError("Database lock poisoned"))
}

fn db_error(e: duckdb::Error) -> HttpResponse {
    HttpResponse::InternalServerError().body(e.to_string())
}

fn forbidden() -> HttpResponse {
    HttpResponse::Forbidden().body("Not allowed for this role")
}

// --- Experts ---

#[get("")]
pub async fn list_experts(pool: web::Data<DbPool>) -> WebResult<HttpResponse> {
    let conn = lock(&pool)?;

    match DbService::list_experts(&conn) {
        Ok(experts) => Ok(HttpResponse::Ok().json(experts)),
        Err(e) => Ok(db_error(e)),
    }
}

#[get("/{id}")]
pub async fn get_expert(pool: web::Data<DbPool>, id: web::Path<Uuid>) -> WebResult<HttpResponse> {
    let conn = lock(&pool)?;

    match DbService::get_expert(&conn, id.into_inner()) {
        Ok(Some(expert)) => Ok(HttpResponse::Ok().json(expert)),
        Ok(None) => Ok(HttpResponse::NotFound().finish()),
        Err(e) => Ok(db_error(e)),
    }
}

#[post("")]
pub async fn create_expert(
    pool: web::Data<DbPool>,
    identity: web::ReqData<Identity>,
    req: web::Json<CreateExpertRequest>,
) -> WebResult<HttpResponse> {
    if identity.role != UserRole::Admin {
        return Ok(forbidden());
    }
    let conn = lock(&pool)?;
    let req = req.into_inner();

    match DbService::insert_expert(&conn, &req.name, &req.specialty, &req.description, &req.capabilities) {
        Ok(expert) => Ok(HttpResponse::Created().json(expert)),
        Err(e) => Ok(db_error(e)),
    }
}

// --- Consultations ---

#[post("")]
pub async fn start_consultation(
    pool: web::Data<DbPool>,
    consultations: web::Data<ConsultationService>,
    identity: web::ReqData<Identity>,
    req: web::Json<StartConsultationRequest>,
) -> WebResult<HttpResponse> {
    let expert = {
        let conn = lock(&pool)?;
        match DbService::get_expert(&conn, req.expert_id) {
            Ok(Some(expert)) => expert,
            Ok(None) => return Ok(HttpResponse::NotFound().body("Expert not found")),
            Err(e) => return Ok(db_error(e)),
        }
    };

    let view = consultations.start(&expert, &identity.user_id).await;
    Ok(HttpResponse::Created().json(view))
}

#[get("")]
pub async fn list_consultations(
    pool: web::Data<DbPool>,
    identity: web::ReqData<Identity>,
    query: web::Query<PaginationQuery>,
) -> WebResult<HttpResponse> {
    let conn = lock(&pool)?;
    let patient = if identity.is_reviewer() {
        None
    } else {
        Some(identity.user_id.as_str())
    };

    match DbService::list_consultations(&conn, patient, query.limit, query.offset) {
        Ok(records) => Ok(HttpResponse::Ok().json(records)),
        Err(e) => Ok(db_error(e)),
    }
}

#[get("/{id}")]
pub async fn get_consultation(
    consultations: web::Data<ConsultationService>,
    identity: web::ReqData<Identity>,
    id: web::Path<Uuid>,
) -> WebResult<HttpResponse> {
    let view = consultations.snapshot(id.into_inner(), &identity.user_id).await?;
    Ok(HttpResponse::Ok().json(view))
}

#[post("/{id}/resume")]
pub async fn resume_consultation(
    consultations: web::Data<ConsultationService>,
    identity: web::ReqData<Identity>,
    id: web::Path<Uuid>,
) -> WebResult<HttpResponse> {
    let view = consultations.resume(id.into_inner(), &identity.user_id).await?;
    Ok(HttpResponse::Ok().json(view))
}

#[delete("/{id}")]
pub async fn end_consultation(
    consultations: web::Data<ConsultationService>,
    identity: web::ReqData<Identity>,
    id: web::Path<Uuid>,
) -> WebResult<HttpResponse> {
    consultations.end(id.into_inner(), &identity.user_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// --- Messages ---

#[post("/{id}/messages")]
pub async fn send_message(
    consultations: web::Data<ConsultationService>,
    identity: web::ReqData<Identity>,
    id: web::Path<Uuid>,
    req: web::Json<SendMessageRequest>,
) -> WebResult<HttpResponse> {
    let reply = consultations
        .submit_turn(id.into_inner(), &identity.user_id, &req.content)
        .await?;
    Ok(HttpResponse::Created().json(reply))
}

#[get("/{id}/messages")]
pub async fn get_messages(
    pool: web::Data<DbPool>,
    identity: web::ReqData<Identity>,
    id: web::Path<Uuid>,
    query: web::Query<PaginationQuery>,
) -> WebResult<HttpResponse> {
    let conn = lock(&pool)?;
    let id = id.into_inner();

    match DbService::get_consultation(&conn, id) {
        Ok(Some(record)) if record.patient_id == identity.user_id || identity.is_reviewer() => {}
        Ok(_) => return Ok(HttpResponse::NotFound().body("Consultation not found")),
        Err(e) => return Ok(db_error(e)),
    }

    match DbService::get_messages(&conn, id, query.limit, query.offset) {
        Ok(messages) => Ok(HttpResponse::Ok().json(messages)),
        Err(e) => Ok(db_error(e)),
    }
}

// --- Referral ---

#[get("/{id}/referral")]
pub async fn referral_status(
    consultations: web::Data<ConsultationService>,
    identity: web::ReqData<Identity>,
    id: web::Path<Uuid>,
) -> WebResult<HttpResponse> {
    let available = consultations
        .referral_available(id.into_inner(), &identity.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(ReferralAvailability { available }))
}

#[post("/{id}/referral")]
pub async fn send_referral(
    consultations: web::Data<ConsultationService>,
    identity: web::ReqData<Identity>,
    id: web::Path<Uuid>,
) -> WebResult<HttpResponse> {
    let receipt = consultations
        .send_referral(id.into_inner(), &identity.user_id)
        .await?;
    Ok(HttpResponse::Created().json(receipt))
}

#[post("/{id}/sync")]
pub async fn sync_consultation(
    consultations: web::Data<ConsultationService>,
    identity: web::ReqData<Identity>,
    id: web::Path<Uuid>,
) -> WebResult<HttpResponse> {
    let synced = consultations.sync(id.into_inner(), &identity.user_id).await?;
    Ok(HttpResponse::Ok().json(SyncStatus { synced }))
}

#[get("/{id}/export")]
pub async fn export_consultation(
    pool: web::Data<DbPool>,
    identity: web::ReqData<Identity>,
    id: web::Path<Uuid>,
) -> WebResult<HttpResponse> {
    let conn = lock(&pool)?;
    let id = id.into_inner();

    match DbService::get_consultation(&conn, id) {
        Ok(Some(record)) if record.patient_id == identity.user_id || identity.is_reviewer() => {}
        Ok(_) => return Ok(HttpResponse::NotFound().finish()),
        Err(e) => return Ok(db_error(e)),
    }

    match DbService::export_transcript(&conn, id) {
        Ok(Some(export)) => Ok(HttpResponse::Ok()
            .content_type("text/plain")
            .insert_header((
                "Content-Disposition",
                format!("attachment; filename=\"consultation_{}.txt\"", id),
            ))
            .body(export)),
        Ok(None) => Ok(HttpResponse::NotFound().finish()),
        Err(e) => Ok(db_error(e)),
    }
}

// --- Doctor review ---

#[get("")]
pub async fn list_referrals(
    pool: web::Data<DbPool>,
    identity: web::ReqData<Identity>,
    query: web::Query<ReferralListQuery>,
) -> WebResult<HttpResponse> {
    if !identity.is_reviewer() {
        return Ok(forbidden());
    }
    let conn = lock(&pool)?;

    match DbService::list_referrals(&conn, query.status, query.limit, query.offset) {
        Ok(referrals) => Ok(HttpResponse::Ok().json(referrals)),
        Err(e) => Ok(db_error(e)),
    }
}

#[get("/{id}")]
pub async fn get_referral(
    pool: web::Data<DbPool>,
    identity: web::ReqData<Identity>,
    id: web::Path<Uuid>,
) -> WebResult<HttpResponse> {
    if !identity.is_reviewer() {
        return Ok(forbidden());
    }
    let conn = lock(&pool)?;

    match DbService::get_referral(&conn, id.into_inner()) {
        Ok(Some(referral)) => Ok(HttpResponse::Ok().json(referral)),
        Ok(None) => Ok(HttpResponse::NotFound().finish()),
        Err(e) => Ok(db_error(e)),
    }
}

#[post("/{id}/review")]
pub async fn review_referral(
    pool: web::Data<DbPool>,
    identity: web::ReqData<Identity>,
    id: web::Path<Uuid>,
    decision: web::Json<ReferralDecision>,
) -> WebResult<HttpResponse> {
    if !identity.is_reviewer() {
        return Ok(forbidden());
    }
    let conn = lock(&pool)?;

    match DbService::review_referral(&conn, id.into_inner(), &decision) {
        Ok(ReviewOutcome::Reviewed(referral)) => Ok(HttpResponse::Ok().json(referral)),
        Ok(ReviewOutcome::NotPending(referral)) => Ok(HttpResponse::Conflict().json(referral)),
        Ok(ReviewOutcome::NotFound) => Ok(HttpResponse::NotFound().finish()),
        Err(e) => Ok(db_error(e)),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/experts")
            .service(list_experts)
            .service(create_expert)
            .service(get_expert),
    )
    .service(
        web::scope("/consultations")
            .service(start_consultation)
            .service(list_consultations)
            .service(get_consultation)
            .service(resume_consultation)
            .service(end_consultation)
            .service(send_message)
            .service(get_messages)
            .service(referral_status)
            .service(send_referral)
            .service(sync_consultation)
            .service(export_consultation),
    )
    .service(
        web::scope("/referrals")
            .service(list_referrals)
            .service(get_referral)
            .service(review_referral),
    );
}
