mod users;

pub use users::{
    cmd_user_add, cmd_user_list, cmd_user_passwd, cmd_user_remove, cmd_user_role,
    cmd_user_set_active,
};
