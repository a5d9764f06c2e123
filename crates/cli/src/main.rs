use anyhow::Context;
use clap::{Parser, Subcommand};
use clinic_core::config::{
    auto_replenish_from_env_value, data_dir_from_env_value, price_table_from_env_value,
    slot_grid_from_env_values,
};
use clinic_core::records::{
    Appointment, AvailabilitySlot, Bill, Medicine, OutcomeRecord, Patient, ReplenishmentRequest,
};
use clinic_core::{
    Clinic, ClinicConfig, ClinicDate, ClinicalUpdate, FieldText, NewOutcome, NonEmptyText,
    TimeSlot,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "clinic")]
#[command(about = "Clinic appointments, records and pharmacy CLI")]
struct Cli {
    /// Data directory (overrides CLINIC_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace a doctor's available slots for a date
    SetAvailability {
        doctor_id: NonEmptyText,
        date: ClinicDate,
        /// Slots as HH:MM-HH:MM; none closes the whole day
        slots: Vec<TimeSlot>,
    },
    /// List a doctor's available slots for a date
    ViewAvailability {
        doctor_id: NonEmptyText,
        date: ClinicDate,
    },
    /// Show every slot and its status for a doctor's day
    Schedule {
        doctor_id: NonEmptyText,
        date: ClinicDate,
    },
    /// Restore the booking of a confirmed appointment
    MarkBooked {
        doctor_id: NonEmptyText,
        date: ClinicDate,
        slot: TimeSlot,
        appointment_id: NonEmptyText,
    },
    /// Release a booking no confirmed appointment holds
    MarkFree {
        doctor_id: NonEmptyText,
        date: ClinicDate,
        slot: TimeSlot,
        appointment_id: NonEmptyText,
    },

    /// Request an appointment in an available slot
    Request {
        doctor_id: NonEmptyText,
        patient_id: NonEmptyText,
        date: ClinicDate,
        slot: TimeSlot,
    },
    /// Accept a pending appointment
    Accept { appointment_id: NonEmptyText },
    /// Decline a pending appointment
    Decline { appointment_id: NonEmptyText },
    /// Move an appointment to another date and slot
    Reschedule {
        appointment_id: NonEmptyText,
        date: ClinicDate,
        slot: TimeSlot,
    },
    /// Cancel a pending or confirmed appointment
    Cancel { appointment_id: NonEmptyText },
    /// Show an appointment's status
    Status { appointment_id: NonEmptyText },
    /// List a doctor's pending requests
    PendingRequests { doctor_id: NonEmptyText },
    /// List a doctor's confirmed appointments
    Upcoming { doctor_id: NonEmptyText },
    /// List a doctor's confirmed appointments on a date
    AppointmentsOn {
        doctor_id: NonEmptyText,
        date: ClinicDate,
    },
    /// List a patient's appointments
    PatientAppointments { patient_id: NonEmptyText },

    /// Complete a confirmed appointment with its outcome
    RecordOutcome {
        appointment_id: NonEmptyText,
        #[arg(long)]
        date: ClinicDate,
        #[arg(long)]
        diagnosis: NonEmptyText,
        #[arg(long)]
        medicine: NonEmptyText,
        #[arg(long)]
        quantity: u32,
        #[arg(long, default_value_t)]
        plan: FieldText,
        #[arg(long, default_value_t)]
        service: FieldText,
        #[arg(long, default_value_t)]
        notes: FieldText,
    },
    /// Revise the clinical fields of a recorded outcome
    UpdateRecord {
        appointment_id: NonEmptyText,
        #[arg(long)]
        diagnosis: NonEmptyText,
        #[arg(long)]
        medicine: NonEmptyText,
        #[arg(long)]
        quantity: u32,
        #[arg(long, default_value_t)]
        plan: FieldText,
        #[arg(long, default_value_t)]
        notes: FieldText,
    },

    /// Register a patient
    RegisterPatient {
        patient_id: NonEmptyText,
        name: NonEmptyText,
        #[arg(long, default_value_t)]
        date_of_birth: FieldText,
        #[arg(long, default_value_t)]
        gender: FieldText,
        #[arg(long, default_value_t)]
        contact_no: FieldText,
        #[arg(long, default_value_t)]
        email: FieldText,
        #[arg(long, default_value_t)]
        blood_type: FieldText,
    },
    /// Change a patient's email and contact number
    UpdateContact {
        patient_id: NonEmptyText,
        #[arg(long)]
        email: FieldText,
        #[arg(long)]
        contact_no: FieldText,
    },
    /// Show a patient's record and treatment history
    MedicalRecord { patient_id: NonEmptyText },
    /// List the outcomes of a patient's appointments
    PastOutcomes { patient_id: NonEmptyText },

    /// Dispense the prescription of a completed appointment
    Dispense { appointment_id: NonEmptyText },
    /// Show the outcome of a completed appointment
    ViewOutcome { appointment_id: NonEmptyText },
    /// List prescriptions awaiting dispense
    PendingPrescriptions,
    /// List every medicine and its stock
    Inventory,
    /// List medicines below their low-stock threshold
    LowStock,
    /// Add a medicine to the inventory
    AddMedicine {
        name: NonEmptyText,
        stock: u32,
        low_stock_threshold: u32,
    },

    /// Request a restock of a medicine
    SubmitReplenishment { medicine: NonEmptyText, quantity: u32 },
    /// Approve a replenishment request and restock
    ApproveReplenishment { request_id: NonEmptyText },
    /// Reject a replenishment request
    RejectReplenishment { request_id: NonEmptyText },
    /// List replenishment requests
    Replenishments {
        /// Only show pending requests
        #[arg(long)]
        pending: bool,
    },

    /// Show the bill for an appointment
    Bill { appointment_id: NonEmptyText },
    /// List every bill
    Bills,
    /// Pay a bill, optionally leaving feedback
    PayBill {
        appointment_id: NonEmptyText,
        #[arg(long)]
        feedback: Option<FieldText>,
    },
}

/// Resolve configuration from the environment once, before any operation runs.
fn config_from_env(data_dir: Option<PathBuf>) -> anyhow::Result<ClinicConfig> {
    let var = |name: &str| std::env::var(name).ok();

    let data_dir = data_dir.unwrap_or_else(|| data_dir_from_env_value(var("CLINIC_DATA_DIR")));
    let slot_grid =
        slot_grid_from_env_values(var("CLINIC_DAY_START_HOUR"), var("CLINIC_DAY_END_HOUR"))
            .context("invalid clinic hours")?;
    let price_table =
        price_table_from_env_value(var("CLINIC_PRICE_TABLE")).context("invalid price table")?;
    let auto_replenish = auto_replenish_from_env_value(var("CLINIC_AUTO_REPLENISH_QUANTITY"))?;

    Ok(ClinicConfig::new(data_dir, slot_grid, price_table).with_auto_replenish(auto_replenish))
}

/// Print `value` as pretty JSON, or as the human-readable text produced by `text`.
fn emit<T: Serialize + ?Sized>(
    json: bool,
    value: &T,
    text: impl FnOnce(&T) -> String,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text(value));
    }
    Ok(())
}

fn appointment_line(appt: &Appointment) -> String {
    format!(
        "{}  doctor {}  patient {}  {} {}  {}",
        appt.id,
        appt.doctor_id,
        appt.patient_id,
        appt.date,
        appt.slot,
        appt.status.as_str()
    )
}

fn outcome_line(record: &OutcomeRecord) -> String {
    format!(
        "{}  {}  {}  {} x {}  {}  plan: {}",
        record.appointment_id,
        record.date,
        record.diagnosis,
        record.medicine,
        record.quantity,
        record.prescription_status.as_str(),
        record.treatment_plan
    )
}

fn medicine_line(medicine: &Medicine) -> String {
    format!(
        "{}  stock {}  threshold {}{}",
        medicine.name,
        medicine.stock,
        medicine.low_stock_threshold,
        if medicine.is_low() { "  LOW" } else { "" }
    )
}

fn request_line(request: &ReplenishmentRequest) -> String {
    format!(
        "{}  {} x {}  {}",
        request.id,
        request.medicine,
        request.quantity,
        request.status.as_str()
    )
}

fn bill_line(bill: &Bill) -> String {
    format!(
        "{}  {:.2}  {}  feedback: {}",
        bill.appointment_id,
        bill.amount,
        bill.status.as_str(),
        bill.feedback
    )
}

fn slot_line(row: &AvailabilitySlot) -> String {
    match &row.booked_by {
        Some(appointment_id) => {
            format!("{}  {} ({appointment_id})", row.slot, row.status.as_str())
        }
        None => format!("{}  {}", row.slot, row.status.as_str()),
    }
}

fn patient_text(patient: &Patient) -> String {
    let mut lines = vec![
        format!("{}  {}", patient.id, patient.name),
        format!("  date of birth: {}", patient.date_of_birth),
        format!("  gender: {}", patient.gender),
        format!("  contact: {} / {}", patient.contact_no, patient.email),
        format!("  blood type: {}", patient.blood_type),
    ];
    if patient.history.is_empty() {
        lines.push("  no past treatments".into());
    }
    for entry in &patient.history {
        lines.push(format!(
            "  {}: {} (plan: {})",
            entry.appointment_id, entry.diagnosis, entry.treatment_plan
        ));
    }
    lines.join("\n")
}

fn lines<T>(items: &[T], empty: &str, line: fn(&T) -> String) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    items.iter().map(line).collect::<Vec<_>>().join("\n")
}

fn run(clinic: &Clinic, json: bool, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::SetAvailability {
            doctor_id,
            date,
            slots,
        } => {
            let available = clinic
                .availability
                .set_availability(&doctor_id, date, &slots)?;
            emit(json, &available, |slots| {
                format!("{} available slot(s) for {doctor_id} on {date}", slots.len())
            })
        }
        Commands::ViewAvailability { doctor_id, date } => {
            let available = clinic.availability.view_availability(&doctor_id, date)?;
            emit(json, &available, |slots| {
                lines(slots, "No available slots.", TimeSlot::to_string)
            })
        }
        Commands::Schedule { doctor_id, date } => {
            let rows = clinic.availability.schedule(&doctor_id, date)?;
            emit(json, &rows, |rows| lines(rows, "No schedule for that day.", slot_line))
        }
        Commands::MarkBooked {
            doctor_id,
            date,
            slot,
            appointment_id,
        } => {
            clinic
                .availability
                .mark_booked(&doctor_id, date, slot, &appointment_id)?;
            emit(json, &slot, |slot| format!("Booked {slot} for {appointment_id}"))
        }
        Commands::MarkFree {
            doctor_id,
            date,
            slot,
            appointment_id,
        } => {
            let released = clinic
                .availability
                .mark_free(&doctor_id, date, slot, &appointment_id)?;
            emit(json, &released, |released| {
                if *released {
                    format!("Released {slot}")
                } else {
                    format!("{slot} was not held by {appointment_id}")
                }
            })
        }

        Commands::Request {
            doctor_id,
            patient_id,
            date,
            slot,
        } => {
            let appt = clinic
                .appointments
                .request_appointment(&doctor_id, &patient_id, date, slot)?;
            emit(json, &appt, appointment_line)
        }
        Commands::Accept { appointment_id } => {
            emit(json, &clinic.appointments.accept(&appointment_id)?, appointment_line)
        }
        Commands::Decline { appointment_id } => {
            emit(json, &clinic.appointments.decline(&appointment_id)?, appointment_line)
        }
        Commands::Reschedule {
            appointment_id,
            date,
            slot,
        } => {
            let appt = clinic.appointments.reschedule(&appointment_id, date, slot)?;
            emit(json, &appt, appointment_line)
        }
        Commands::Cancel { appointment_id } => {
            emit(json, &clinic.appointments.cancel(&appointment_id)?, appointment_line)
        }
        Commands::Status { appointment_id } => {
            let status = clinic.appointments.appointment_status(&appointment_id)?;
            emit(json, &status, |status| status.as_str().to_string())
        }
        Commands::PendingRequests { doctor_id } => {
            let pending = clinic.appointments.pending_requests(&doctor_id)?;
            emit(json, &pending, |appts| {
                lines(appts, "No pending requests.", appointment_line)
            })
        }
        Commands::Upcoming { doctor_id } => {
            let upcoming = clinic.appointments.upcoming_appointments(&doctor_id)?;
            emit(json, &upcoming, |appts| {
                lines(appts, "No upcoming appointments.", appointment_line)
            })
        }
        Commands::AppointmentsOn { doctor_id, date } => {
            let day = clinic.appointments.appointments_on(&doctor_id, date)?;
            emit(json, &day, |appts| {
                lines(appts, "No appointments that day.", appointment_line)
            })
        }
        Commands::PatientAppointments { patient_id } => {
            let appts = clinic.appointments.appointments_for_patient(&patient_id)?;
            emit(json, &appts, |appts| {
                lines(appts, "No appointments.", appointment_line)
            })
        }

        Commands::RecordOutcome {
            appointment_id,
            date,
            diagnosis,
            medicine,
            quantity,
            plan,
            service,
            notes,
        } => {
            let record = clinic.outcomes.record_outcome(
                &appointment_id,
                NewOutcome {
                    diagnosis,
                    medicine,
                    quantity,
                    treatment_plan: plan,
                    date,
                    service_type: service,
                    notes,
                },
            )?;
            emit(json, &record, outcome_line)
        }
        Commands::UpdateRecord {
            appointment_id,
            diagnosis,
            medicine,
            quantity,
            plan,
            notes,
        } => {
            let record = clinic.outcomes.update_medical_record(
                &appointment_id,
                ClinicalUpdate {
                    diagnosis,
                    medicine,
                    quantity,
                    treatment_plan: plan,
                    notes,
                },
            )?;
            emit(json, &record, outcome_line)
        }

        Commands::RegisterPatient {
            patient_id,
            name,
            date_of_birth,
            gender,
            contact_no,
            email,
            blood_type,
        } => {
            let patient = clinic.patients.register_patient(Patient {
                id: patient_id,
                name,
                date_of_birth,
                gender,
                contact_no,
                email,
                blood_type,
                history: Vec::new(),
            })?;
            emit(json, &patient, |patient| {
                format!("Registered patient {}", patient.id)
            })
        }
        Commands::UpdateContact {
            patient_id,
            email,
            contact_no,
        } => {
            let patient = clinic
                .patients
                .update_contact(&patient_id, email, contact_no)?;
            emit(json, &patient, patient_text)
        }
        Commands::MedicalRecord { patient_id } => {
            emit(json, &clinic.patients.medical_record(&patient_id)?, patient_text)
        }
        Commands::PastOutcomes { patient_id } => {
            let outcomes = clinic.patients.past_outcomes(&patient_id)?;
            emit(json, &outcomes, |records| {
                lines(records, "No past outcomes.", outcome_line)
            })
        }

        Commands::Dispense { appointment_id } => {
            let receipt = clinic.dispensing.dispense(&appointment_id)?;
            emit(json, &receipt, |receipt| {
                let mut text = format!(
                    "Dispensed {} x {}; {} left. Bill {:.2} ({})",
                    receipt.outcome.medicine,
                    receipt.outcome.quantity,
                    receipt.medicine.stock,
                    receipt.bill.amount,
                    receipt.bill.status.as_str()
                );
                if receipt.low_stock {
                    text.push_str("\nWarning: stock is below the low-stock threshold");
                }
                if let Some(request) = &receipt.replenishment {
                    text.push_str(&format!("\nFiled replenishment {}", request_line(request)));
                }
                text
            })
        }
        Commands::ViewOutcome { appointment_id } => {
            emit(json, &clinic.dispensing.view_outcome(&appointment_id)?, outcome_line)
        }
        Commands::PendingPrescriptions => {
            let pending = clinic.dispensing.pending_prescriptions()?;
            emit(json, &pending, |records| {
                lines(records, "No pending prescriptions.", outcome_line)
            })
        }
        Commands::Inventory => {
            let inventory = clinic.dispensing.inventory()?;
            emit(json, &inventory, |items| {
                lines(items, "Inventory is empty.", medicine_line)
            })
        }
        Commands::LowStock => {
            let low = clinic.dispensing.low_stock()?;
            emit(json, &low, |items| {
                lines(items, "No medicine is low on stock.", medicine_line)
            })
        }
        Commands::AddMedicine {
            name,
            stock,
            low_stock_threshold,
        } => {
            let medicine = clinic.dispensing.add_medicine(Medicine {
                name,
                stock,
                low_stock_threshold,
            })?;
            emit(json, &medicine, medicine_line)
        }

        Commands::SubmitReplenishment { medicine, quantity } => {
            let request = clinic.replenishment.submit(&medicine, quantity)?;
            emit(json, &request, request_line)
        }
        Commands::ApproveReplenishment { request_id } => {
            let (request, stock) = clinic.replenishment.approve(&request_id)?;
            emit(json, &request, |request| {
                format!("{}; {} stock now {stock}", request_line(request), request.medicine)
            })
        }
        Commands::RejectReplenishment { request_id } => {
            emit(json, &clinic.replenishment.reject(&request_id)?, request_line)
        }
        Commands::Replenishments { pending } => {
            let requests = if pending {
                clinic.replenishment.pending()?
            } else {
                clinic.replenishment.list()?
            };
            emit(json, &requests, |requests| {
                lines(requests, "No replenishment requests.", request_line)
            })
        }

        Commands::Bill { appointment_id } => {
            emit(json, &clinic.billing.bill(&appointment_id)?, bill_line)
        }
        Commands::Bills => {
            let bills = clinic.billing.bills()?;
            emit(json, &bills, |bills| lines(bills, "No bills.", bill_line))
        }
        Commands::PayBill {
            appointment_id,
            feedback,
        } => emit(
            json,
            &clinic.billing.pay_bill(&appointment_id, feedback)?,
            bill_line,
        ),
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("clinic=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'clinic --help' for commands");
        return Ok(());
    };

    let cfg = Arc::new(config_from_env(cli.data_dir)?);
    tracing::debug!(
        data_dir = %cfg.data_dir().display(),
        auto_replenish = ?cfg.auto_replenish_quantity(),
        "configuration resolved"
    );
    let clinic = Clinic::open(cfg).context("failed to open clinic data")?;
    run(&clinic, cli.json, command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn slots_and_dates_parse_from_arguments() {
        let cli = Cli::try_parse_from([
            "clinic",
            "set-availability",
            "D001",
            "2024-01-10",
            "09:00-09:30",
            "09:30-10:00",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::SetAvailability { slots, date, .. }) => {
                assert_eq!(slots.len(), 2);
                assert_eq!(date.to_string(), "2024-01-10");
            }
            _ => panic!("expected set-availability"),
        }

        assert!(Cli::try_parse_from(["clinic", "request", "D001", "P001", "2024-01-10", "9am"])
            .is_err());
        assert!(Cli::try_parse_from(["clinic", "accept", "A1,A2"]).is_err());
    }

    #[test]
    fn empty_slot_list_closes_the_day() {
        let cli = Cli::try_parse_from(["clinic", "set-availability", "D001", "2024-01-10"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::SetAvailability { slots, .. }) if slots.is_empty()
        ));
    }

    #[test]
    fn update_contact_needs_both_fields() {
        let cli = Cli::try_parse_from([
            "clinic",
            "update-contact",
            "P001",
            "--email",
            "alice@clinic.test",
            "--contact-no",
            "91234567",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::UpdateContact { email, .. }) if email.as_str() == "alice@clinic.test"
        ));

        assert!(Cli::try_parse_from(["clinic", "update-contact", "P001", "--email", "a@b.c"])
            .is_err());
    }
}
