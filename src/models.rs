use chrono::{DateTime, NaiveDate, Utc};
use diesel::{
    Selectable,
    prelude::{AsChangeset, Identifiable, Insertable, Queryable},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::{
    AppointmentStatus, DeliveryStatus, LabBookingStatus, NotificationKind, OrderStatus,
    OutboxStatus, PaymentMethod, Role, TransactionStatus,
};

// Users & profiles

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserEntity {
    pub id: i32,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub role: Role,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::users)]
pub struct CreateUserEntity {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_approved: bool,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::patients)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PatientEntity {
    pub id: i32,
    pub user_id: i32,
    pub full_name: String,
    pub phone: String,
    pub address: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::patients)]
pub struct CreatePatientEntity {
    pub user_id: i32,
    pub full_name: String,
    pub phone: String,
    pub address: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::pharmacies)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PharmacyEntity {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub license_number: String,
    pub phone: String,
    pub address: String,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::pharmacies)]
pub struct CreatePharmacyEntity {
    pub user_id: i32,
    pub name: String,
    pub license_number: String,
    pub phone: String,
    pub address: String,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::laboratories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LaboratoryEntity {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub license_number: String,
    pub phone: String,
    pub address: String,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::laboratories)]
pub struct CreateLaboratoryEntity {
    pub user_id: i32,
    pub name: String,
    pub license_number: String,
    pub phone: String,
    pub address: String,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::doctors)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DoctorEntity {
    pub id: i32,
    pub user_id: i32,
    pub full_name: String,
    pub specialization: String,
    pub license_number: String,
    pub phone: String,
    pub consultation_fee: Decimal,
    pub experience_years: i32,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::doctors)]
pub struct CreateDoctorEntity {
    pub user_id: i32,
    pub full_name: String,
    pub specialization: String,
    pub license_number: String,
    pub phone: String,
    pub consultation_fee: Decimal,
    pub experience_years: i32,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::delivery_partners)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeliveryPartnerEntity {
    pub id: i32,
    pub user_id: i32,
    pub full_name: String,
    pub phone: String,
    pub vehicle_number: String,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::delivery_partners)]
pub struct CreateDeliveryPartnerEntity {
    pub user_id: i32,
    pub full_name: String,
    pub phone: String,
    pub vehicle_number: String,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::admins)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AdminEntity {
    pub id: i32,
    pub user_id: i32,
    pub full_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::admins)]
pub struct CreateAdminEntity {
    pub user_id: i32,
    pub full_name: String,
}

// Catalog

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::medicines)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MedicineEntity {
    pub id: i32,
    pub pharmacy_id: i32,
    pub name: String,
    pub generic_name: Option<String>,
    pub manufacturer: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock: i32,
    pub requires_prescription: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::medicines)]
pub struct CreateMedicineEntity {
    pub pharmacy_id: i32,
    pub name: String,
    pub generic_name: Option<String>,
    pub manufacturer: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock: i32,
    pub requires_prescription: bool,
}

#[derive(AsChangeset, Deserialize, Debug, Default, ToSchema)]
#[diesel(table_name = crate::schema::medicines)]
pub struct UpdateMedicineEntity {
    pub name: Option<String>,
    pub generic_name: Option<String>,
    pub manufacturer: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub stock: Option<i32>,
    pub requires_prescription: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::lab_tests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LabTestEntity {
    pub id: i32,
    pub laboratory_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub sample_type: Option<String>,
    pub price: Decimal,
    pub turnaround_hours: i32,
    pub home_collection_available: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::lab_tests)]
pub struct CreateLabTestEntity {
    pub laboratory_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub sample_type: Option<String>,
    pub price: Decimal,
    pub turnaround_hours: i32,
    pub home_collection_available: bool,
}

#[derive(AsChangeset, Deserialize, Debug, Default, ToSchema)]
#[diesel(table_name = crate::schema::lab_tests)]
pub struct UpdateLabTestEntity {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub sample_type: Option<String>,
    pub price: Option<Decimal>,
    pub turnaround_hours: Option<i32>,
    pub home_collection_available: Option<bool>,
    pub is_active: Option<bool>,
}

// Prescriptions

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::prescriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PrescriptionEntity {
    pub id: i32,
    pub patient_id: i32,
    pub original_name: String,
    pub stored_path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub extracted_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::prescriptions)]
pub struct CreatePrescriptionEntity {
    pub patient_id: i32,
    pub original_name: String,
    pub stored_path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub extracted_text: Option<String>,
}

// Orders

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderEntity {
    pub id: i32,
    pub patient_id: i32,
    pub pharmacy_id: i32,
    pub prescription_id: Option<i32>,
    pub status: OrderStatus,
    pub delivery_address: String,
    pub notes: Option<String>,
    pub total_amount: Decimal,
    pub commission_amount: Decimal,
    pub net_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::orders)]
pub struct CreateOrderEntity {
    pub patient_id: i32,
    pub pharmacy_id: i32,
    pub prescription_id: Option<i32>,
    pub status: OrderStatus,
    pub delivery_address: String,
    pub notes: Option<String>,
    pub total_amount: Decimal,
    pub commission_amount: Decimal,
    pub net_amount: Decimal,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItemEntity {
    pub id: i32,
    pub order_id: i32,
    pub medicine_id: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::order_items)]
pub struct CreateOrderItemEntity {
    pub order_id: i32,
    pub medicine_id: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
}

// Deliveries

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::deliveries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeliveryEntity {
    pub id: Uuid,
    pub order_id: i32,
    pub delivery_partner_id: Option<i32>,
    pub status: DeliveryStatus,
    pub pickup_address: String,
    pub delivery_address: String,
    pub assigned_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::deliveries)]
pub struct CreateDeliveryEntity {
    pub order_id: i32,
    pub status: DeliveryStatus,
    pub pickup_address: String,
    pub delivery_address: String,
}

// Lab bookings

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::lab_bookings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LabBookingEntity {
    pub id: i32,
    pub patient_id: i32,
    pub laboratory_id: i32,
    pub lab_test_id: i32,
    pub status: LabBookingStatus,
    pub scheduled_at: DateTime<Utc>,
    pub home_collection: bool,
    pub collection_address: Option<String>,
    pub result_notes: Option<String>,
    pub total_amount: Decimal,
    pub commission_amount: Decimal,
    pub net_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::lab_bookings)]
pub struct CreateLabBookingEntity {
    pub patient_id: i32,
    pub laboratory_id: i32,
    pub lab_test_id: i32,
    pub status: LabBookingStatus,
    pub scheduled_at: DateTime<Utc>,
    pub home_collection: bool,
    pub collection_address: Option<String>,
    pub total_amount: Decimal,
    pub commission_amount: Decimal,
    pub net_amount: Decimal,
}

// Appointments

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::appointments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AppointmentEntity {
    pub id: i32,
    pub patient_id: i32,
    pub doctor_id: i32,
    pub status: AppointmentStatus,
    pub scheduled_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub doctor_notes: Option<String>,
    pub total_amount: Decimal,
    pub commission_amount: Decimal,
    pub net_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::appointments)]
pub struct CreateAppointmentEntity {
    pub patient_id: i32,
    pub doctor_id: i32,
    pub status: AppointmentStatus,
    pub scheduled_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub total_amount: Decimal,
    pub commission_amount: Decimal,
    pub net_amount: Decimal,
}

// Transactions

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TransactionEntity {
    pub id: Uuid,
    pub user_id: i32,
    pub order_id: Option<i32>,
    pub lab_booking_id: Option<i32>,
    pub appointment_id: Option<i32>,
    pub amount: Decimal,
    pub commission_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::transactions)]
pub struct CreateTransactionEntity {
    pub user_id: i32,
    pub order_id: Option<i32>,
    pub lab_booking_id: Option<i32>,
    pub appointment_id: Option<i32>,
    pub amount: Decimal,
    pub commission_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub status: TransactionStatus,
}

// Notifications

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NotificationEntity {
    pub id: i32,
    pub user_id: i32,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::notifications)]
pub struct CreateNotificationEntity {
    pub user_id: i32,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

// Outbox

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::outbox)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OutboxEntity {
    pub id: i32,
    pub event_type: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::outbox)]
pub struct CreateOutboxEntity {
    pub event_type: String,
    pub payload: String,
    pub status: OutboxStatus,
}
